//! Replays a captured event log and reconciles it against a ledger read
//! remotely at the same block.

use futures::executor::block_on;
use oyster_ledger::config::SyncConfig;
use oyster_ledger::events::{LedgerEvent, LogPosition};
use oyster_ledger::ledger::{Order, OrderKey, Range, RangeKey};
use oyster_ledger::reconcile::Replay;
use oyster_ledger::sync::{load_ledger, StaticSource, SyncRequest};
use oyster_ledger::{Address, Ledger, I256, PERP_EXPIRY, Q96, U256, WAD};
use serde_json::{json, Value};

const GATE: Address = Address::with_last_byte(0xee);
const INSTRUMENT: Address = Address::with_last_byte(0x10);
const QUOTE: Address = Address::with_last_byte(0xc0);
const LP: Address = Address::with_last_byte(1);
const MAKER: Address = Address::with_last_byte(2);
const TAKER: Address = Address::with_last_byte(3);
const LIQUIDITY: u128 = 1_000_000_000_000_000_000_000_000;
const SYNC_BLOCK: u64 = 9;

/// Decimal string of `n` WAD.
fn w(n: i64) -> String {
    format!("{n}000000000000000000")
}

fn wad(n: i64) -> I256 {
    I256::try_from(n).unwrap() * I256::try_from(WAD).unwrap()
}

fn uwad(n: u64) -> U256 {
    U256::from(n) * WAD
}

fn ev(block_number: u64, log_index: u32, address: Address, event: Value) -> LedgerEvent {
    serde_json::from_value(json!({
        "address": address,
        "block_number": block_number,
        "log_index": log_index,
        "timestamp": block_number * 12,
        "event": event,
    }))
    .unwrap()
}

fn captured_log(funding_mark: &str) -> Vec<LedgerEvent> {
    vec![
        ev(
            1,
            0,
            GATE,
            json!({"name": "Deposit", "args": {"quote": QUOTE, "trader": LP, "quantity": w(2000)}}),
        ),
        ev(
            1,
            1,
            GATE,
            json!({"name": "Scatter", "args": {"quote": QUOTE, "trader": LP, "quantity": w(1000)}}),
        ),
        ev(
            1,
            2,
            GATE,
            json!({"name": "Deposit", "args": {
                "quote": QUOTE, "trader": MAKER, "quantity": w(100)
            }}),
        ),
        ev(
            1,
            3,
            GATE,
            json!({"name": "Deposit", "args": {
                "quote": QUOTE, "trader": TAKER, "quantity": w(100)
            }}),
        ),
        ev(
            2,
            0,
            INSTRUMENT,
            json!({"name": "NewPair", "args": {
                "expiry": PERP_EXPIRY, "sqrt_px96": Q96.to_string()
            }}),
        ),
        ev(3, 0, INSTRUMENT, json!({"name": "Add", "args": {
            "expiry": PERP_EXPIRY, "trader": LP, "tick_lower": -1000, "tick_upper": 1000,
            "range": {
                "liquidity": LIQUIDITY.to_string(),
                "balance": w(1000),
                "sqrt_entry_px96": Q96.to_string(),
                "entry_fee_index": "0"
            }
        }})),
        ev(
            4,
            0,
            GATE,
            json!({"name": "Scatter", "args": {
                "quote": QUOTE, "trader": MAKER, "quantity": w(50)
            }}),
        ),
        ev(4, 1, INSTRUMENT, json!({"name": "Place", "args": {
            "expiry": PERP_EXPIRY, "trader": MAKER, "tick": 0, "nonce": 0,
            "order": {"balance": w(50), "size": w(-500)}
        }})),
        ev(
            5,
            0,
            GATE,
            json!({"name": "Scatter", "args": {
                "quote": QUOTE, "trader": TAKER, "quantity": w(100)
            }}),
        ),
        ev(5, 1, INSTRUMENT, json!({"name": "Trade", "args": {
            "expiry": PERP_EXPIRY, "trader": TAKER, "size": w(600), "amount": w(100), "fee_ratio": 5
        }})),
        ev(
            6,
            0,
            INSTRUMENT,
            json!({"name": "UpdateFundingIndex", "args": {
                "expiry": PERP_EXPIRY, "mark_price": funding_mark
            }}),
        ),
        ev(
            7,
            0,
            INSTRUMENT,
            json!({"name": "Fill", "args": {
                "expiry": PERP_EXPIRY, "trader": MAKER, "tick": 0, "nonce": 0
            }}),
        ),
        ev(7, 1, INSTRUMENT, json!({"name": "Trade", "args": {
            "expiry": PERP_EXPIRY, "trader": TAKER, "size": w(-100), "amount": "0", "fee_ratio": 5
        }})),
        ev(
            8,
            0,
            GATE,
            json!({"name": "Withdraw", "args": {"quote": QUOTE, "trader": LP, "quantity": w(500)}}),
        ),
        ev(
            8,
            1,
            GATE,
            json!({"name": "SetThreshold", "args": {"quote": QUOTE, "threshold": w(1_000_000)}}),
        ),
        ev(
            8,
            2,
            GATE,
            json!({"name": "NewPending", "args": {
                "quote": QUOTE, "trader": LP, "quantity": w(100)
            }}),
        ),
        ev(
            9,
            0,
            INSTRUMENT,
            json!({"name": "Adjust", "args": {
                "expiry": PERP_EXPIRY, "trader": MAKER, "net": w(-10)
            }}),
        ),
    ]
}

/// The same history driven straight through the state handlers, standing in
/// for the exchange itself.
fn chain() -> Ledger {
    let mut chain = Ledger::new(GATE);
    let gate = chain.gate_mut();
    gate.apply_deposit(QUOTE, LP, uwad(2000)).unwrap();
    gate.apply_deposit(QUOTE, MAKER, uwad(100)).unwrap();
    gate.apply_deposit(QUOTE, TAKER, uwad(100)).unwrap();
    for (trader, margin) in [(LP, 1000), (MAKER, 50), (TAKER, 100)] {
        gate.with_quote(QUOTE, |q| {
            let reserve = q.reserve(&trader) - uwad(margin);
            q.set_reserve(trader, reserve)
        });
    }
    gate.apply_withdraw(QUOTE, LP, uwad(500)).unwrap();
    gate.with_quote(QUOTE, |q| q.threshold = uwad(1_000_000));
    gate.apply_new_pending(QUOTE, LP, uwad(100), 96).unwrap();

    let instrument = chain.instrument_mut(INSTRUMENT);
    instrument.apply_new_pair(PERP_EXPIRY, Q96, 24).unwrap();
    instrument
        .apply_add(
            PERP_EXPIRY,
            LP,
            RangeKey::new(-1000, 1000),
            Range {
                liquidity: LIQUIDITY,
                balance: wad(1000),
                sqrt_entry_px96: Q96,
                entry_fee_index: U256::ZERO,
            },
        )
        .unwrap();
    instrument
        .apply_place(
            PERP_EXPIRY,
            MAKER,
            OrderKey::new(0, 0),
            Order {
                balance: wad(50),
                size: wad(-500),
            },
        )
        .unwrap();
    instrument
        .apply_trade(PERP_EXPIRY, TAKER, wad(600), wad(100), 5)
        .unwrap();
    instrument
        .apply_update_funding_index(PERP_EXPIRY, WAD, 72)
        .unwrap();
    instrument
        .apply_fill(PERP_EXPIRY, MAKER, OrderKey::new(0, 0))
        .unwrap();
    instrument
        .apply_trade(PERP_EXPIRY, TAKER, wad(-100), I256::ZERO, 5)
        .unwrap();
    instrument.apply_adjust(PERP_EXPIRY, MAKER, wad(-10)).unwrap();
    chain
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn live_read() -> Ledger {
    let source = StaticSource::new(chain(), SYNC_BLOCK);
    let mut request = SyncRequest::new(GATE);
    request.instruments = vec![INSTRUMENT];
    request.traders = vec![LP, MAKER, TAKER];
    request.quotes = vec![QUOTE];
    block_on(load_ledger(&source, &request, &SyncConfig::default())).unwrap()
}

#[test]
fn replayed_log_matches_live_read() {
    init_tracing();
    let mut replay = Replay::new(GATE);
    replay.apply_all(&captured_log(&w(1))).unwrap();
    let live = live_read();
    assert_eq!(live.last_position(), Some(LogPosition::end_of_block(SYNC_BLOCK)));

    let comparison = replay.compare(&live).unwrap();
    assert!(
        !comparison.has_differences,
        "unexpected mismatches: {:#?}",
        comparison.mismatches
    );

    let flow = replay.totals().fund_flow(&QUOTE, &LP);
    assert_eq!(flow.total_in, uwad(2000));
    assert_eq!(flow.total_out, uwad(500));
    assert!(!replay.totals().volume(&INSTRUMENT, &TAKER).is_zero());
    // both sides held open interest, nothing went to the insurance fund
    assert_eq!(replay.totals().funding(&INSTRUMENT, PERP_EXPIRY), U256::ZERO);
}

#[test]
fn divergent_history_is_reported_not_raised() {
    init_tracing();
    let mut replay = Replay::new(GATE);
    replay.apply_all(&captured_log(&w(2))).unwrap();
    let comparison = replay.compare(&live_read()).unwrap();
    assert!(comparison.has_differences);
    let prefix = format!("instruments/{INSTRUMENT}/pairs/{PERP_EXPIRY}/amm/");
    assert!(comparison
        .mismatches
        .iter()
        .any(|m| m.path == format!("{prefix}long_funding_index")));
}

#[test]
fn loaded_ledger_continues_after_its_block() {
    let mut live = live_read();
    let late = captured_log(&w(1)).pop().unwrap();
    assert!(live.apply(&late).is_err());

    let next = ev(
        SYNC_BLOCK + 1,
        0,
        GATE,
        json!({"name": "ReleasePending", "args": {"quote": QUOTE, "trader": LP, "released": true}}),
    );
    live.apply(&next).unwrap();
    assert_eq!(live.gate().fund_flow(&QUOTE, &LP).total_out, uwad(600));
}
