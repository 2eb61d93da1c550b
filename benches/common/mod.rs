use criterion::{black_box, Criterion};
use oyster_ledger::ledger::position::{combine, Position};
use oyster_ledger::math::bit_math::{least_significant_bit, most_significant_bit};
use oyster_ledger::math::fixed_point::{tick_to_wad, wdiv, wmul, wmul_int};
use oyster_ledger::math::sqrt_price_math::{
    get_delta_base, get_delta_quote, get_next_sqrt_price_from_input,
};
use oyster_ledger::math::swap_math::swap_within_range;
use oyster_ledger::math::tick_bitmap::TickBitmap;
use oyster_ledger::math::tick_math::{get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio};
use oyster_ledger::pair::{PairState, Pearl};
use oyster_ledger::{I256, PERP_EXPIRY, Q96, U256, WAD};

const L: u128 = 1_000_000_000_000_000_000_000_000;
/// Thin enough that a few hundred base walks the whole order ladder.
const LADDER_L: u128 = 1_000_000_000_000_000_000_000;

fn wad(n: i128) -> I256 {
    I256::try_from(n).unwrap() * I256::try_from(WAD).unwrap()
}

/// A pair at tick 0 with liquidity over [-5000, 5000) and a ladder of sell
/// orders every 10 ticks above the price.
pub fn laddered_pair() -> PairState {
    let mut pair = PairState::new(PERP_EXPIRY, Q96, 0).unwrap();
    let delta = LADDER_L as i128;
    for (tick, net) in [(-5000, delta), (5000, -delta)] {
        pair.set_pearl(
            tick,
            Pearl {
                liquidity_gross: LADDER_L,
                liquidity_net: net,
                ..Default::default()
            },
        )
        .unwrap();
    }
    pair.amm.liquidity = LADDER_L;
    pair.amm.total_liquidity = LADDER_L;
    for tick in (10..=500).step_by(10) {
        pair.set_pearl(
            tick,
            Pearl {
                left: wad(-5),
                ..Default::default()
            },
        )
        .unwrap();
    }
    pair
}

pub fn bench_tick_math(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_math");
    group.bench_function("get_sqrt_ratio_at_tick", |b| {
        b.iter(|| get_sqrt_ratio_at_tick(black_box(-123_456)).unwrap())
    });
    let sqrt = get_sqrt_ratio_at_tick(98_765).unwrap();
    group.bench_function("get_tick_at_sqrt_ratio", |b| {
        b.iter(|| get_tick_at_sqrt_ratio(black_box(sqrt)).unwrap())
    });
    group.finish();
}

pub fn bench_sqrt_price_math(c: &mut Criterion) {
    let mut group = c.benchmark_group("sqrt_price_math");
    let upper = get_sqrt_ratio_at_tick(1000).unwrap();
    group.bench_function("get_delta_base", |b| {
        b.iter(|| get_delta_base(black_box(Q96), black_box(upper), L, true).unwrap())
    });
    group.bench_function("get_delta_quote", |b| {
        b.iter(|| get_delta_quote(black_box(Q96), black_box(upper), L, false).unwrap())
    });
    group.bench_function("get_next_sqrt_price_from_input", |b| {
        b.iter(|| get_next_sqrt_price_from_input(black_box(Q96), L, black_box(WAD), true).unwrap())
    });
    group.finish();
}

pub fn bench_swap_math(c: &mut Criterion) {
    let target = get_sqrt_ratio_at_tick(500).unwrap();
    c.bench_function("swap_within_range", |b| {
        b.iter(|| {
            swap_within_range(black_box(Q96), black_box(target), L, black_box(wad(3))).unwrap()
        })
    });
}

pub fn bench_fixed_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_point");
    let x = U256::from(3u8) * WAD;
    let y = U256::from(7u8) * WAD;
    group.bench_function("wmul", |b| b.iter(|| wmul(black_box(x), black_box(y)).unwrap()));
    group.bench_function("wdiv", |b| b.iter(|| wdiv(black_box(x), black_box(y)).unwrap()));
    group.bench_function("wmul_int", |b| {
        b.iter(|| wmul_int(black_box(wad(-3)), black_box(wad(7))).unwrap())
    });
    group.bench_function("tick_to_wad", |b| b.iter(|| tick_to_wad(black_box(-4_321)).unwrap()));
    group.finish();
}

pub fn bench_tick_bitmap(c: &mut Criterion) {
    let mut bitmap = TickBitmap::new();
    for tick in (-20_000..20_000).step_by(997) {
        bitmap.flip_tick(tick, 1).unwrap();
    }
    let mut group = c.benchmark_group("tick_bitmap");
    group.bench_function("next_initialized_tick_up", |b| {
        b.iter(|| bitmap.next_initialized_tick(black_box(-19_000), 1, false).unwrap())
    });
    group.bench_function("next_initialized_tick_down", |b| {
        b.iter(|| bitmap.next_initialized_tick(black_box(19_000), 1, true).unwrap())
    });
    group.finish();
}

pub fn bench_bit_math(c: &mut Criterion) {
    let x = U256::from(1u8) << 200usize | U256::from(1u8) << 3usize;
    let mut group = c.benchmark_group("bit_math");
    group.bench_function("most_significant_bit", |b| {
        b.iter(|| most_significant_bit(black_box(x)).unwrap())
    });
    group.bench_function("least_significant_bit", |b| {
        b.iter(|| least_significant_bit(black_box(x)).unwrap())
    });
    group.finish();
}

pub fn bench_swap_cross_range(c: &mut Criterion) {
    let pair = laddered_pair();
    let mut group = c.benchmark_group("swap_cross_range");
    group.bench_function("curve_only_sell", |b| {
        b.iter(|| pair.swap_cross_range(black_box(wad(-20))).unwrap())
    });
    group.bench_function("ladder_buy", |b| {
        b.iter(|| pair.swap_cross_range(black_box(wad(200))).unwrap())
    });
    group.bench_function("trade", |b| {
        b.iter_batched(
            || pair.clone(),
            |mut pair| pair.trade(black_box(wad(200)), 5).unwrap(),
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_combine(c: &mut Criterion) {
    let pair = laddered_pair();
    let long = Position {
        balance: wad(100),
        size: wad(10),
        entry_notional: U256::from(10u8) * WAD,
        ..Default::default()
    };
    let short = Position {
        balance: wad(50),
        size: wad(-4),
        entry_notional: U256::from(5u8) * WAD,
        ..Default::default()
    };
    c.bench_function("combine_opposite", |b| {
        b.iter(|| combine(&pair.amm, black_box(long.clone()), black_box(short.clone())).unwrap())
    });
}
