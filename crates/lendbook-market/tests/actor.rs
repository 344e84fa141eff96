//! Integration test: market controller and book actors

use lendbook_engine::{Operation, replay};
use lendbook_market::{MarketController, OrderApproval, OrderRequest};
use lendbook_types::*;

fn account(n: u8) -> AccountId {
    AccountId::from_bytes([n; 16])
}

fn usdc() -> MarketConfig {
    MarketConfig::dummy()
}

fn eth() -> MarketConfig {
    MarketConfig::new(Currency::new("ETH"), Maturity(2_000_000), 5_000)
}

fn request(side: Side, n: u8, amount: Amount, unit_price: Option<UnitPrice>, now: u64) -> OrderRequest {
    OrderRequest {
        side,
        account: account(n),
        amount,
        unit_price,
        now,
    }
}

#[tokio::test]
async fn duplicate_market_rejected() {
    let mut controller = MarketController::new(EngineConfig::default());
    controller.create_order_book(usdc()).unwrap();
    assert!(matches!(
        controller.create_order_book(usdc()),
        Err(LendbookError::MarketAlreadyExists(_))
    ));
    controller.create_order_book(eth()).unwrap();
    assert_eq!(controller.market_keys().len(), 2);
}

#[tokio::test]
async fn unknown_market_rejected() {
    let controller = MarketController::new(EngineConfig::default());
    let err = controller
        .create_order(
            &usdc().key(),
            request(Side::Lend, 1, 10, Some(9_000), 1_000),
            OrderApproval::Approved,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LendbookError::MarketNotFound(_)));
}

#[tokio::test]
async fn unapproved_borrow_rejected() {
    let mut controller = MarketController::new(EngineConfig::default());
    let key = controller.create_order_book(usdc()).unwrap().market().clone();

    let err = controller
        .create_pre_order(
            &key,
            request(Side::Borrow, 1, 10, Some(9_000), 10),
            OrderApproval::NotApproved,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LendbookError::CollateralNotApproved));

    controller
        .create_pre_order(
            &key,
            request(Side::Lend, 1, 10, Some(9_000), 10),
            OrderApproval::NotApproved,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn itayose_and_matching_through_actor() {
    let mut controller = MarketController::new(EngineConfig::default());
    let mut events = controller.subscribe();
    let book = controller.create_order_book(usdc()).unwrap();
    let key = book.market().clone();

    controller
        .create_pre_order(&key, request(Side::Lend, 1, 200, Some(8_300), 1), OrderApproval::Approved)
        .await
        .unwrap();
    controller
        .create_pre_order(&key, request(Side::Borrow, 2, 100, Some(8_000), 2), OrderApproval::Approved)
        .await
        .unwrap();

    let outcome = book.execute_itayose_call(1_000).await.unwrap();
    assert_eq!(outcome.log.unwrap().opening_unit_price, 8_300);

    let exec = controller
        .create_order(&key, request(Side::Borrow, 3, 50, None, 1_001), OrderApproval::Approved)
        .await
        .unwrap();
    assert_eq!(exec.filled_amount, 50);

    let snapshot = book.snapshot(10).await.unwrap();
    assert_eq!(snapshot.state, BookState::Open);
    assert_eq!(snapshot.lend.amounts, vec![50]);
    assert_eq!(snapshot.reference_unit_price, Some(8_300));

    let orders = book.account_orders(account(1)).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].amount, 50);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.market, key);
        kinds.push(event.event.kind());
    }
    assert!(kinds.contains(&"itayose_executed"));
    assert!(kinds.contains(&"fill"));
    assert_eq!(kinds.first(), Some(&"make"));
}

#[tokio::test]
async fn cancel_requires_owner() {
    let mut controller = MarketController::new(EngineConfig::default());
    let book = controller.create_order_book(usdc()).unwrap();
    let key = book.market().clone();
    book.advance(1_000).await.unwrap();

    let exec = controller
        .create_order(&key, request(Side::Lend, 1, 10, Some(9_000), 1_001), OrderApproval::Approved)
        .await
        .unwrap();
    let order_id = exec.placed_order.unwrap().id;

    let err = controller
        .cancel_order(&key, order_id, account(2), 1_002)
        .await
        .unwrap_err();
    assert!(matches!(err, LendbookError::OrderNotFound(_)));

    let cancelled = controller
        .cancel_order(&key, order_id, account(1), 1_003)
        .await
        .unwrap();
    assert_eq!(cancelled.amount, 10);
    assert!(book.get_order(order_id).await.unwrap().is_none());
}

#[tokio::test]
async fn books_are_independent() {
    let mut controller = MarketController::new(EngineConfig::default());
    let usdc_book = controller.create_order_book(usdc()).unwrap();
    let eth_book = controller.create_order_book(eth()).unwrap();

    usdc_book.advance(1_000).await.unwrap();
    assert_eq!(usdc_book.snapshot(1).await.unwrap().state, BookState::Open);
    assert_eq!(eth_book.snapshot(1).await.unwrap().state, BookState::PreOrder);

    assert_eq!(usdc_book.pause(1_001).await.unwrap(), BookState::Paused);
    assert!(matches!(
        eth_book.pause(1_001).await,
        Err(LendbookError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn actor_matches_direct_replay() {
    let ops = vec![
        Operation::CreatePreOrder {
            side: Side::Lend,
            account: account(1),
            amount: 500,
            unit_price: 9_100,
            now: 1,
        },
        Operation::CreatePreOrder {
            side: Side::Borrow,
            account: account(2),
            amount: 300,
            unit_price: 9_000,
            now: 2,
        },
        Operation::ExecuteItayoseCall { now: 1_000 },
        Operation::CreateOrder {
            side: Side::Borrow,
            account: account(3),
            amount: 400,
            unit_price: Some(9_050),
            now: 1_001,
        },
        Operation::CancelOrder {
            order_id: OrderId(99),
            account: None,
            now: 1_002,
        },
    ];

    let mut controller = MarketController::new(EngineConfig::default());
    let book = controller.create_order_book(usdc()).unwrap();
    for op in ops.clone() {
        let _ = book.execute(op).await;
    }
    let actor_digest = book.state_digest().await.unwrap();

    let direct = replay(usdc(), &ops).unwrap();
    assert_eq!(actor_digest, direct.book.state_digest());
    assert_eq!(direct.rejections.len(), 1);

    drop(book);
    let books = controller.shutdown().await.unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].state_digest(), actor_digest);
}

#[tokio::test]
async fn estimate_through_actor() {
    let mut controller = MarketController::new(EngineConfig::default());
    let book = controller.create_order_book(usdc()).unwrap();
    book.advance(1_000).await.unwrap();
    book.create_order(Side::Lend, account(1), 100, Some(9_000), 1_001)
        .await
        .unwrap();

    let estimate = book.estimate_fill(Side::Borrow, 150, None).await.unwrap();
    assert_eq!(estimate.filled_amount, 100);
    assert_eq!(estimate.unfilled_amount, 50);
    // Estimating never changes the book.
    assert_eq!(book.snapshot(1).await.unwrap().lend.amounts, vec![100]);
}
