//! Integration Tests - Use Cases Against Mocked Ports
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mockall::mock;
use mockall::predicate::*;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, watch};

use dtf_trader::domain::creation::{CreateDtfParams, CreationStage, DraftIssue, DraftToken, DtfDraft};
use dtf_trader::domain::estimator::{PayoutRule, PurchaseRequest, ShareCostEstimator};
use dtf_trader::domain::market::{DtfRecord, MarketSnapshot, PoolInfo, SharePrices, ShareSupply, Side};
use dtf_trader::domain::trade::{DtfFees, TradeOutcome, TradeStatus, UserTrade};
use dtf_trader::error::{CreationError, LifecycleError, PurchaseError, TxError};
use dtf_trader::ports::chain_client::{ChainReader, ChainWriter, LockedToken, TxReceipt};
use dtf_trader::ports::trade_index::{IndexerEvent, TradeIndex};
use dtf_trader::usecases::creation::DtfCreator;
use dtf_trader::usecases::portfolio::PortfolioTracker;
use dtf_trader::usecases::purchase::PurchaseFlow;
use dtf_trader::usecases::settlement::MarketLifecycle;
use dtf_trader::usecases::snapshot_feed::{fetch_market_state, MarketRegistry, SnapshotFeed};

// ---- Mock Definitions ----

mock! {
    pub Reader {}

    #[async_trait::async_trait]
    impl ChainReader for Reader {
        async fn next_dtf_id(&self) -> anyhow::Result<u64>;
        async fn dtf(&self, dtf_id: u64) -> anyhow::Result<DtfRecord>;
        async fn share_prices(&self, dtf_id: u64) -> anyhow::Result<SharePrices>;
        async fn pool_info(&self, dtf_id: u64) -> anyhow::Result<PoolInfo>;
        async fn current_valuation(&self, dtf_id: u64) -> anyhow::Result<u128>;
        async fn locked_tokens(&self, dtf_id: u64) -> anyhow::Result<Vec<LockedToken>>;
        async fn basket_valuation(&self, tokens: &[String], amounts: &[u128]) -> anyhow::Result<u128>;
        async fn total_supply(&self, token: &str) -> anyhow::Result<u128>;
        async fn balance_of(&self, token: &str, owner: &str) -> anyhow::Result<u128>;
        async fn allowance(&self, token: &str, owner: &str, spender: &str) -> anyhow::Result<u128>;
        async fn is_healthy(&self) -> bool;
    }
}

mock! {
    pub Writer {}

    #[async_trait::async_trait]
    impl ChainWriter for Writer {
        fn wallet_address(&self) -> String;
        async fn approve(&self, token: &str, spender: &str, amount_raw: u128) -> Result<TxReceipt, TxError>;
        async fn buy_shares(&self, dtf_id: u64, side: Side, shares_raw: u128) -> Result<TxReceipt, TxError>;
        async fn settle(&self, dtf_id: u64) -> Result<TxReceipt, TxError>;
        async fn claim_winnings(&self, dtf_id: u64) -> Result<TxReceipt, TxError>;
        async fn withdraw_tokens(&self, dtf_id: u64) -> Result<TxReceipt, TxError>;
        async fn submit_create_dtf(&self, params: &CreateDtfParams) -> Result<String, TxError>;
        async fn await_receipt(&self, tx_hash: &str) -> Result<TxReceipt, TxError>;
    }
}

mock! {
    pub Index {}

    #[async_trait::async_trait]
    impl TradeIndex for Index {
        async fn user_trades(&self, address: &str) -> anyhow::Result<Vec<UserTrade>>;
        async fn dtf_fees(&self, dtf_id: u64) -> anyhow::Result<DtfFees>;
        async fn record_claim(&self, address: &str, dtf_id: u64) -> anyhow::Result<()>;
        fn subscribe(&self) -> broadcast::Receiver<IndexerEvent>;
        async fn is_healthy(&self) -> bool;
    }
}

// ---- Fixtures ----

const WALLET: &str = "0x00000000000000000000000000000000000000A1";
const USDC: &str = "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238";
const MARKET: &str = "0x00000000000000000000000000000000000000D7";
const LINK: &str = "0x779877A7B0D9E8603169DdbD7836e478b4624789";
const AAVE: &str = "0x88541670E55cC00bEEFD87eB59EDd1b7C511AC9a";
const SHARE: u128 = 1_000_000_000_000_000_000;
const USDC_UNIT: u128 = 1_000_000;

fn receipt(hash: &str) -> TxReceipt {
    TxReceipt {
        tx_hash: hash.to_string(),
        block_number: Some(7_000_000),
        gas_used: 120_000,
    }
}

fn record(dtf_id: u64, expiry: DateTime<Utc>, is_settled: bool, creator: &str) -> DtfRecord {
    DtfRecord {
        dtf_id,
        creator: creator.to_string(),
        name: format!("Basket {dtf_id}"),
        expiry: expiry.timestamp(),
        target_valuation: 1_000 * SHARE,
        is_target_higher: true,
        is_settled,
        yes_won: false,
        yes_token: format!("0xyes{dtf_id}"),
        no_token: format!("0xno{dtf_id}"),
    }
}

/// Open market: YES at 0.50 USDC, pools 100/100, 200 YES shares out.
fn open_snapshot(dtf_id: u64) -> MarketSnapshot {
    MarketSnapshot {
        prices: Some(SharePrices {
            yes: 500_000,
            no: 500_000,
        }),
        pool: Some(PoolInfo {
            pool_yes: 100 * USDC_UNIT,
            pool_no: 100 * USDC_UNIT,
            total_volume: 250 * USDC_UNIT,
        }),
        supply: Some(ShareSupply {
            yes: 200 * SHARE,
            no: 200 * SHARE,
        }),
        ..MarketSnapshot::empty(dtf_id, Utc::now())
    }
}

fn trade(dtf_id: u64, position: Side, yes_won: bool, claimed: bool) -> UserTrade {
    UserTrade {
        dtf_id,
        dtf_name: "Basket".to_string(),
        position,
        shares: "10".to_string(),
        average_entry_price: "0.5".to_string(),
        roi: "+20.00%".to_string(),
        status: TradeStatus::Settled,
        claimed,
        dtf: TradeOutcome { yes_won },
    }
}

fn writer_with_wallet() -> MockWriter {
    let mut writer = MockWriter::new();
    writer.expect_wallet_address().returning(|| WALLET.to_string());
    writer
}

fn purchase_flow(reader: MockReader, writer: MockWriter) -> PurchaseFlow<MockReader, MockWriter> {
    PurchaseFlow::new(
        Arc::new(reader),
        Arc::new(writer),
        ShareCostEstimator::default(),
        USDC,
        MARKET,
    )
}

// ---- Purchase ----

#[tokio::test]
async fn test_purchase_blocked_when_allowance_short() {
    let mut reader = MockReader::new();
    reader
        .expect_allowance()
        .withf(|token, owner, spender| token == USDC && owner == WALLET && spender == MARKET)
        .times(1)
        .returning(|_, _, _| Ok(40 * USDC_UNIT));

    let mut writer = writer_with_wallet();
    writer.expect_buy_shares().times(0);

    let flow = purchase_flow(reader, writer);
    let request = PurchaseRequest::new(Side::Yes, dec!(100));

    let err = flow.buy(&open_snapshot(1), &request).await.unwrap_err();
    assert!(matches!(err, PurchaseError::NeedsApproval));
}

#[tokio::test]
async fn test_purchase_submits_once_when_ready() {
    let mut reader = MockReader::new();
    reader
        .expect_allowance()
        .returning(|_, _, _| Ok(60 * USDC_UNIT));

    let mut writer = writer_with_wallet();
    writer
        .expect_buy_shares()
        .with(eq(1u64), eq(Side::Yes), eq(100 * SHARE))
        .times(1)
        .returning(|_, _, _| Ok(receipt("0xbuy")));

    let flow = purchase_flow(reader, writer);
    let request = PurchaseRequest::from_input(Side::Yes, "100");

    let quote = flow.quote(&open_snapshot(1), &request);
    assert_eq!(quote.cost, dec!(50));
    assert_eq!(quote.fee, dec!(1.25));

    let tx = flow.buy(&open_snapshot(1), &request).await.unwrap();
    assert_eq!(tx.tx_hash, "0xbuy");
}

#[tokio::test]
async fn test_purchase_revert_is_surfaced_without_retry() {
    let mut reader = MockReader::new();
    reader
        .expect_allowance()
        .returning(|_, _, _| Ok(1_000 * USDC_UNIT));

    let mut writer = writer_with_wallet();
    writer.expect_buy_shares().times(1).returning(|_, _, _| {
        Err(TxError::Reverted {
            tx_hash: "0xdead".to_string(),
        })
    });

    let flow = purchase_flow(reader, writer);
    let err = flow
        .buy(&open_snapshot(1), &PurchaseRequest::new(Side::No, dec!(10)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PurchaseError::Transaction(TxError::Reverted { ref tx_hash }) if tx_hash == "0xdead"
    ));
}

#[tokio::test]
async fn test_purchase_refused_on_closed_market_or_bad_quantity() {
    let mut writer = writer_with_wallet();
    writer.expect_buy_shares().times(0);
    let flow = purchase_flow(MockReader::new(), writer);

    let mut settled = open_snapshot(2);
    settled.is_settled = true;
    let err = flow
        .buy(&settled, &PurchaseRequest::new(Side::Yes, dec!(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::MarketClosed { dtf_id: 2 }));

    let err = flow
        .buy(&open_snapshot(2), &PurchaseRequest::from_input(Side::Yes, "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::InvalidQuantity));
}

#[tokio::test]
async fn test_approve_grants_exact_cost_and_rereads_gate() {
    let mut reader = MockReader::new();
    reader
        .expect_allowance()
        .times(1)
        .returning(|_, _, _| Ok(50 * USDC_UNIT));

    let mut writer = writer_with_wallet();
    writer
        .expect_approve()
        .withf(|token, spender, amount| token == USDC && spender == MARKET && *amount == 50 * USDC_UNIT)
        .times(1)
        .returning(|_, _, _| Ok(receipt("0xapprove")));

    let flow = purchase_flow(reader, writer);
    let quote = flow.quote(&open_snapshot(1), &PurchaseRequest::new(Side::Yes, dec!(100)));

    let gate = flow.approve(&quote).await.unwrap();
    assert!(gate.is_ready());
}

// ---- Lifecycle ----

fn lifecycle(
    reader: MockReader,
    writer: MockWriter,
    index: MockIndex,
) -> MarketLifecycle<MockReader, MockWriter, MockIndex> {
    MarketLifecycle::new(Arc::new(reader), Arc::new(writer), Arc::new(index))
}

#[tokio::test]
async fn test_settle_only_after_expiry() {
    let now = Utc::now();

    let mut reader = MockReader::new();
    reader
        .expect_dtf()
        .with(eq(1u64))
        .returning(move |id| Ok(record(id, now - ChronoDuration::hours(1), false, WALLET)));
    reader
        .expect_dtf()
        .with(eq(2u64))
        .returning(move |id| Ok(record(id, now + ChronoDuration::hours(1), false, WALLET)));

    let mut writer = MockWriter::new();
    writer
        .expect_settle()
        .with(eq(1u64))
        .times(1)
        .returning(|_| Ok(receipt("0xsettle")));

    let lc = lifecycle(reader, writer, MockIndex::new());

    assert_eq!(lc.settle(1, now).await.unwrap().tx_hash, "0xsettle");
    let err = lc.settle(2, now).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotSettleable { dtf_id: 2 }));
}

#[tokio::test]
async fn test_claim_survives_indexer_failure() {
    let mut writer = writer_with_wallet();
    writer
        .expect_claim_winnings()
        .with(eq(4u64))
        .times(1)
        .returning(|_| Ok(receipt("0xclaim")));

    let mut index = MockIndex::new();
    index
        .expect_record_claim()
        .withf(|address, id| address == WALLET && *id == 4)
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("indexer down")));

    let lc = lifecycle(MockReader::new(), writer, index);
    let tx = lc.claim(&trade(4, Side::Yes, true, false)).await.unwrap();
    assert_eq!(tx.tx_hash, "0xclaim");
}

#[tokio::test]
async fn test_claim_refused_for_losing_or_claimed_trade() {
    let mut writer = MockWriter::new();
    writer.expect_claim_winnings().times(0);
    let lc = lifecycle(MockReader::new(), writer, MockIndex::new());

    let losing = lc.claim(&trade(5, Side::Yes, false, false)).await.unwrap_err();
    assert!(matches!(losing, LifecycleError::NotClaimable { dtf_id: 5 }));

    let claimed = lc.claim(&trade(5, Side::No, false, true)).await.unwrap_err();
    assert!(matches!(claimed, LifecycleError::NotClaimable { dtf_id: 5 }));
}

#[tokio::test]
async fn test_withdraw_is_creator_only() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader
        .expect_dtf()
        .returning(move |id| Ok(record(id, now, true, "0x00000000000000000000000000000000000000B2")));

    let mut writer = writer_with_wallet();
    writer.expect_withdraw_tokens().times(0);

    let lc = lifecycle(reader, writer, MockIndex::new());
    let err = lc.withdraw(6).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotCreator { dtf_id: 6 }));
}

#[tokio::test]
async fn test_withdraw_reports_locked_basket() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader
        .expect_dtf()
        .returning(move |id| Ok(record(id, now, true, &WALLET.to_lowercase())));
    reader.expect_locked_tokens().with(eq(6u64)).returning(|_| {
        Ok(vec![
            LockedToken { token: LINK.to_string(), amount_raw: 5 * SHARE },
            LockedToken { token: AAVE.to_string(), amount_raw: 2 * SHARE },
        ])
    });

    let mut writer = writer_with_wallet();
    writer
        .expect_withdraw_tokens()
        .with(eq(6u64))
        .times(1)
        .returning(|_| Ok(receipt("0xwithdraw")));

    let lc = lifecycle(reader, writer, MockIndex::new());
    let withdrawal = lc.withdraw(6).await.unwrap();
    assert_eq!(withdrawal.receipt.tx_hash, "0xwithdraw");
    assert_eq!(withdrawal.tokens.len(), 2);
    assert_eq!(withdrawal.tokens[1].amount_raw, 2 * SHARE);
}

#[tokio::test]
async fn test_settle_sweep_reports_each_market() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader.expect_dtf().returning(move |id| {
        let expiry = if id == 1 {
            now + ChronoDuration::hours(1)
        } else {
            now - ChronoDuration::hours(1)
        };
        Ok(record(id, expiry, false, WALLET))
    });

    let mut writer = MockWriter::new();
    writer.expect_settle().times(2).returning(|id| {
        if id == 0 {
            Ok(receipt("0xok"))
        } else {
            Err(TxError::Reverted {
                tx_hash: "0xbad".to_string(),
            })
        }
    });

    let lc = lifecycle(reader, writer, MockIndex::new());
    let report = lc.settle_expired([0, 1, 2], now).await;

    assert_eq!(report.markets_checked, 3);
    assert_eq!(report.markets_settled, 1);
    assert_eq!(report.markets_failed, 1);
    assert_eq!(report.results.len(), 2);
}

// ---- Creation ----

fn draft(now: DateTime<Utc>, tokens: Vec<DraftToken>) -> DtfDraft {
    DtfDraft {
        name: "DeFi duo".to_string(),
        tokens,
        expiry: now + ChronoDuration::days(1),
        target_valuation: dec!(1200),
        is_target_higher: true,
    }
}

fn basket() -> Vec<DraftToken> {
    vec![
        DraftToken {
            address: LINK.to_string(),
            amount: dec!(10),
        },
        DraftToken {
            address: AAVE.to_string(),
            amount: dec!(2),
        },
    ]
}

fn creator(reader: MockReader, writer: MockWriter) -> DtfCreator<MockReader, MockWriter> {
    DtfCreator::new(
        Arc::new(reader),
        Arc::new(writer),
        MARKET,
        USDC,
        [(USDC.to_ascii_lowercase(), 6)].into_iter().collect(),
    )
}

#[tokio::test]
async fn test_creation_rejects_invalid_draft_without_transactions() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader.expect_balance_of().returning(|_, _| Ok(100 * SHARE));
    reader.expect_basket_valuation().returning(|_, _| Ok(1_000 * SHARE));

    let mut writer = writer_with_wallet();
    writer.expect_approve().times(0);
    writer.expect_submit_create_dtf().times(0);

    let dtf_creator = creator(reader, writer);
    let progress = dtf_creator.progress();

    let mut one_token = draft(now, basket());
    one_token.tokens.truncate(1);
    one_token.target_valuation = dec!(1010);

    let err = dtf_creator.create(&one_token, now).await.unwrap_err();
    let CreationError::Invalid(issues) = err else {
        panic!("expected validation failure");
    };
    assert!(issues.contains(&DraftIssue::TooFewTokens { found: 1 }));
    assert!(issues.iter().any(|i| matches!(i, DraftIssue::TargetTooLow { .. })));
    assert_eq!(*progress.borrow(), CreationStage::Error);
}

#[tokio::test]
async fn test_creation_approves_only_short_allowances_in_order() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader.expect_balance_of().returning(|_, _| Ok(100 * SHARE));
    reader.expect_basket_valuation().returning(|_, _| Ok(1_000 * SHARE));
    reader.expect_allowance().returning(|token, _, _| {
        // LINK already approved; USDC bond and AAVE are short
        if token == LINK { Ok(u128::MAX) } else { Ok(0) }
    });

    let approved = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&approved);

    let mut writer = writer_with_wallet();
    writer.expect_approve().times(2).returning(move |token, _, amount| {
        log.lock().unwrap().push((token.to_string(), amount));
        Ok(receipt("0xapprove"))
    });
    writer
        .expect_submit_create_dtf()
        .withf(|params| params.tokens.len() == 2 && params.amounts == vec![10 * SHARE, 2 * SHARE])
        .times(1)
        .returning(|_| Ok("0xcreate".to_string()));
    writer
        .expect_await_receipt()
        .with(eq("0xcreate"))
        .times(1)
        .returning(|hash| Ok(receipt(hash)));

    let dtf_creator = creator(reader, writer);
    let progress = dtf_creator.progress();

    let outcome = dtf_creator.create(&draft(now, basket()), now).await.unwrap();

    assert_eq!(outcome.receipt.tx_hash, "0xcreate");
    assert_eq!(outcome.approvals.len(), 2);
    assert_eq!(
        *approved.lock().unwrap(),
        vec![(USDC.to_string(), 50 * USDC_UNIT), (AAVE.to_string(), 2 * SHARE)]
    );
    assert_eq!(*progress.borrow(), CreationStage::Complete);
}

/// Records the published stage each time the writer is called.
struct StageLog {
    rx: Arc<OnceLock<watch::Receiver<CreationStage>>>,
    seen: Arc<Mutex<Vec<CreationStage>>>,
}

impl StageLog {
    fn new() -> Self {
        Self {
            rx: Arc::new(OnceLock::new()),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn recorder(&self) -> impl Fn() + Send + Sync + 'static {
        let rx = Arc::clone(&self.rx);
        let seen = Arc::clone(&self.seen);
        move || {
            let stage = rx.get().expect("receiver attached").borrow().clone();
            seen.lock().unwrap().push(stage);
        }
    }

    fn stages(&self) -> Vec<CreationStage> {
        self.seen.lock().unwrap().clone()
    }
}

fn approved_reader() -> MockReader {
    let mut reader = MockReader::new();
    reader.expect_balance_of().returning(|_, _| Ok(100 * SHARE));
    reader.expect_basket_valuation().returning(|_, _| Ok(1_000 * SHARE));
    reader.expect_allowance().returning(|_, _, _| Ok(u128::MAX));
    reader
}

#[tokio::test]
async fn test_creation_publishes_pending_with_hash_between_submit_and_receipt() {
    let now = Utc::now();
    let log = StageLog::new();

    let mut writer = writer_with_wallet();
    writer.expect_approve().times(0);
    let on_submit = log.recorder();
    writer.expect_submit_create_dtf().times(1).returning(move |_| {
        on_submit();
        Ok("0xcreate".to_string())
    });
    let on_receipt = log.recorder();
    writer.expect_await_receipt().times(1).returning(move |hash| {
        on_receipt();
        Ok(receipt(hash))
    });

    let dtf_creator = creator(approved_reader(), writer);
    let progress = dtf_creator.progress();
    log.rx.set(dtf_creator.progress()).unwrap();

    dtf_creator.create(&draft(now, basket()), now).await.unwrap();

    assert_eq!(
        log.stages(),
        vec![
            CreationStage::Creating,
            CreationStage::Pending {
                tx_hash: "0xcreate".to_string()
            },
        ]
    );
    assert_eq!(*progress.borrow(), CreationStage::Complete);
}

#[tokio::test]
async fn test_creation_submit_failure_never_goes_pending() {
    let now = Utc::now();
    let log = StageLog::new();

    let mut writer = writer_with_wallet();
    let on_submit = log.recorder();
    writer.expect_submit_create_dtf().times(1).returning(move |_| {
        on_submit();
        Err(TxError::Rejected("user denied".to_string()))
    });
    writer.expect_await_receipt().times(0);

    let dtf_creator = creator(approved_reader(), writer);
    let progress = dtf_creator.progress();
    log.rx.set(dtf_creator.progress()).unwrap();

    let err = dtf_creator.create(&draft(now, basket()), now).await.unwrap_err();

    assert!(matches!(err, CreationError::Transaction(TxError::Rejected(_))));
    assert_eq!(log.stages(), vec![CreationStage::Creating]);
    assert_eq!(*progress.borrow(), CreationStage::Error);
}

#[tokio::test]
async fn test_creation_reverted_receipt_ends_in_error() {
    let now = Utc::now();
    let mut writer = writer_with_wallet();
    writer
        .expect_submit_create_dtf()
        .returning(|_| Ok("0xcreate".to_string()));
    writer.expect_await_receipt().times(1).returning(|hash| {
        Err(TxError::Reverted {
            tx_hash: hash.to_string(),
        })
    });

    let dtf_creator = creator(approved_reader(), writer);
    let progress = dtf_creator.progress();

    let err = dtf_creator.create(&draft(now, basket()), now).await.unwrap_err();

    assert!(matches!(err, CreationError::Transaction(TxError::Reverted { .. })));
    assert_eq!(*progress.borrow(), CreationStage::Error);
}

// ---- Portfolio ----

#[tokio::test]
async fn test_creator_totals_count_failed_fetch_as_zero() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader.expect_next_dtf_id().returning(|| Ok(3));
    reader.expect_dtf().returning(move |id| {
        let creator = if id == 1 {
            "0x00000000000000000000000000000000000000B2"
        } else {
            WALLET
        };
        Ok(record(id, now, false, creator))
    });

    let mut index = MockIndex::new();
    index.expect_dtf_fees().returning(|id| {
        if id == 0 {
            Ok(DtfFees {
                creator_fees: dec!(12.5),
                total_volume: dec!(500),
            })
        } else {
            Err(anyhow::anyhow!("timeout"))
        }
    });

    let tracker = PortfolioTracker::new(Arc::new(reader), Arc::new(index));
    let totals = tracker
        .creator_totals(&WALLET.to_ascii_lowercase())
        .await
        .unwrap();

    assert_eq!(totals.dtf_count, 2);
    assert_eq!(totals.total_fees, dec!(12.5));
    assert_eq!(totals.total_volume, dec!(500));
}

#[tokio::test]
async fn test_portfolio_summary_from_trades() {
    let mut index = MockIndex::new();
    index.expect_user_trades().returning(|_| {
        let mut active = trade(3, Side::Yes, false, false);
        active.status = TradeStatus::Active;
        Ok(vec![
            trade(1, Side::Yes, true, false),
            trade(2, Side::Yes, false, false),
            active,
        ])
    });

    let tracker = PortfolioTracker::new(Arc::new(MockReader::new()), Arc::new(index));
    let portfolio = tracker.portfolio(WALLET).await.unwrap();

    assert_eq!(portfolio.summary.winning, 1);
    assert_eq!(portfolio.summary.losing, 1);
    assert_eq!(portfolio.summary.active, 1);
    assert_eq!(portfolio.summary.total_roi, dec!(40));
    assert_eq!(portfolio.claimable().count(), 1);
}

// ---- Snapshot feed ----

fn healthy_reader(name_calls: Arc<AtomicUsize>) -> MockReader {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader.expect_dtf().returning(move |id| {
        name_calls.fetch_add(1, Ordering::SeqCst);
        Ok(record(id, now + ChronoDuration::days(1), false, WALLET))
    });
    reader
        .expect_share_prices()
        .returning(|_| Ok(SharePrices { yes: 500_000, no: 500_000 }));
    reader.expect_pool_info().returning(|_| {
        Ok(PoolInfo {
            pool_yes: 100 * USDC_UNIT,
            pool_no: 100 * USDC_UNIT,
            total_volume: 250 * USDC_UNIT,
        })
    });
    reader.expect_total_supply().returning(|_| Ok(200 * SHARE));
    reader.expect_current_valuation().returning(|_| Ok(1_100 * SHARE));
    reader
}

#[tokio::test]
async fn test_snapshot_composes_partial_reads() {
    let now = Utc::now();
    let mut reader = MockReader::new();
    reader
        .expect_dtf()
        .returning(move |id| Ok(record(id, now - ChronoDuration::hours(1), false, WALLET)));
    reader
        .expect_share_prices()
        .returning(|_| Ok(SharePrices { yes: 300_000, no: 700_000 }));
    reader
        .expect_pool_info()
        .returning(|_| Err(anyhow::anyhow!("rpc timeout")));
    reader.expect_total_supply().returning(|_| Ok(5 * SHARE));
    reader
        .expect_current_valuation()
        .returning(|_| Err(anyhow::anyhow!("oracle stale")));

    let state = fetch_market_state(&reader, 9, now).await.unwrap();

    assert!(state.snapshot.prices.is_some());
    assert!(state.snapshot.pool.is_none());
    assert_eq!(state.snapshot.existing_shares(Side::Yes), Some(dec!(5)));
    assert!(state.snapshot.is_expired);
    assert!(!state.snapshot.is_tradeable());
    assert!(state.current_valuation.is_none());

    // Missing pool data neutralises the pool-based figures
    let estimator = ShareCostEstimator::with_rule(PayoutRule::ProRataPool);
    let quote = estimator.quote(&state.snapshot, &PurchaseRequest::new(Side::Yes, dec!(10)));
    assert_eq!(quote.cost, dec!(3));
    assert_eq!(quote.potential_payout, dec!(0));
    assert_eq!(quote.price_impact_pct, dec!(0));
}

#[tokio::test]
async fn test_feed_publishes_and_refreshes_on_invalidation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let reader = Arc::new(healthy_reader(Arc::clone(&calls)));

    let (feed, mut rx) = SnapshotFeed::new(reader, 3, Duration::from_secs(3600), None);
    let (events_tx, events_rx) = broadcast::channel(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(feed.run(events_rx, shutdown_rx));

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();
    let first = rx.borrow_and_update().clone().unwrap();
    assert_eq!(first.snapshot.dtf_id, 3);
    assert_eq!(first.overview().volume, Some(dec!(200)));

    // Unrelated market: ignored
    events_tx.send(IndexerEvent::DtfSettled { dtf_id: Some(4) }).unwrap();
    events_tx.send(IndexerEvent::DtfSettled { dtf_id: Some(3) }).unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok());
}

/// Reader whose first record read is slow and stale.
struct SlowFirstReader {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ChainReader for SlowFirstReader {
    async fn next_dtf_id(&self) -> anyhow::Result<u64> {
        Ok(1)
    }

    async fn dtf(&self, dtf_id: u64) -> anyhow::Result<DtfRecord> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rec = record(dtf_id, Utc::now() + ChronoDuration::days(1), false, WALLET);
        if call == 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            rec.name = "stale".to_string();
        } else {
            rec.name = "fresh".to_string();
        }
        Ok(rec)
    }

    async fn share_prices(&self, _: u64) -> anyhow::Result<SharePrices> {
        Ok(SharePrices { yes: 1, no: 1 })
    }

    async fn pool_info(&self, _: u64) -> anyhow::Result<PoolInfo> {
        Ok(PoolInfo::default())
    }

    async fn current_valuation(&self, _: u64) -> anyhow::Result<u128> {
        Ok(0)
    }

    async fn locked_tokens(&self, _: u64) -> anyhow::Result<Vec<LockedToken>> {
        Ok(Vec::new())
    }

    async fn basket_valuation(&self, _: &[String], _: &[u128]) -> anyhow::Result<u128> {
        Ok(0)
    }

    async fn total_supply(&self, _: &str) -> anyhow::Result<u128> {
        Ok(0)
    }

    async fn balance_of(&self, _: &str, _: &str) -> anyhow::Result<u128> {
        Ok(0)
    }

    async fn allowance(&self, _: &str, _: &str, _: &str) -> anyhow::Result<u128> {
        Ok(0)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_invalidation_supersedes_in_flight_fetch() {
    let reader = Arc::new(SlowFirstReader {
        calls: AtomicUsize::new(0),
    });
    let (feed, mut rx) = SnapshotFeed::new(reader, 1, Duration::from_secs(3600), None);
    let (events_tx, events_rx) = broadcast::channel(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(feed.run(events_rx, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    events_tx.send(IndexerEvent::SharesPurchased { dtf_id: Some(1) }).unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();
    let published = rx.borrow_and_update().clone().unwrap();
    assert_eq!(published.record.name, "fresh");

    // The stale response must never land
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!rx.has_changed().unwrap());

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

// ---- Market registry ----

/// Poll `condition` every 10ms for up to 5s.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn subscribing_index(events_tx: &broadcast::Sender<IndexerEvent>) -> MockIndex {
    let sender = events_tx.clone();
    let mut index = MockIndex::new();
    index.expect_subscribe().returning(move || sender.subscribe());
    index
}

#[tokio::test]
async fn test_registry_watches_created_markets() {
    let mut reader = healthy_reader(Arc::new(AtomicUsize::new(0)));
    reader.expect_next_dtf_id().returning(|| Ok(4));

    let (events_tx, _) = broadcast::channel(16);
    let mut registry = MarketRegistry::new(
        Arc::new(reader),
        Arc::new(subscribing_index(&events_tx)),
        Duration::from_secs(3600),
        None,
    )
    .follow_created(true);

    assert!(registry.watch(1));
    assert!(!registry.watch(1));
    let board = registry.board();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(registry.run(shutdown_rx));

    // One receiver for the feed of market 1, one for the registry itself
    assert!(eventually(|| events_tx.receiver_count() >= 2).await);

    events_tx.send(IndexerEvent::DtfCreated { dtf_id: Some(7) }).unwrap();
    assert!(eventually(|| board.latest(7).is_some()).await);
    assert_eq!(board.latest(7).unwrap().snapshot.dtf_id, 7);

    // No id in the payload: rescan every existing market
    events_tx.send(IndexerEvent::DtfCreated { dtf_id: None }).unwrap();
    assert!(eventually(|| board.market_ids() == vec![0, 1, 2, 3, 7]).await);

    shutdown_tx.send(()).unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap();
    assert!(stopped.unwrap().is_ok());
}

#[tokio::test]
async fn test_registry_keeps_fixed_list() {
    let reader = healthy_reader(Arc::new(AtomicUsize::new(0)));
    let (events_tx, _) = broadcast::channel(16);
    let mut registry = MarketRegistry::new(
        Arc::new(reader),
        Arc::new(subscribing_index(&events_tx)),
        Duration::from_secs(3600),
        None,
    );
    registry.watch(2);
    let board = registry.board();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(registry.run(shutdown_rx));
    assert!(eventually(|| events_tx.receiver_count() >= 2).await);

    events_tx.send(IndexerEvent::DtfCreated { dtf_id: Some(8) }).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!board.is_watched(8));
    assert_eq!(board.market_ids(), vec![2]);

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}
