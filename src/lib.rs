//! Client-side accounting core for an AMM-with-resting-orders derivatives
//! exchange.
//!
//! The crate keeps a local mirror of the exchange ledger and lets callers
//! simulate against it:
//! - `math::*`: 256-bit fixed-point, tick and curve math with on-chain rounding.
//! - [`pair`]: per-expiry AMM state and the swap walk across ticks and resting orders.
//! - [`ledger`]: instruments, accounts, the vault and event application.
//! - [`reconcile`]: event replay and a field-by-field diff against a live read.
//! - [`sync`]: bounded-concurrency loading of a ledger from a remote source.
//!
//! # Examples
//!
//! ## Pure math
//! ```no_run
//! use oyster_ledger::{math::tick_math, Q96, U256};
//!
//! let sqrt_price = tick_math::get_sqrt_ratio_at_tick(0).unwrap();
//! assert_eq!(sqrt_price, Q96);
//! ```
//!
//! ## Simulating a trade against a mirrored pair
//! ```no_run
//! use oyster_ledger::{pair::PairState, I256, PERP_EXPIRY, Q96};
//!
//! let mut pair = PairState::new(PERP_EXPIRY, Q96, 0).unwrap();
//! // ... populate from events or a remote read ...
//! let size = I256::try_from(1_000_000_000_000_000_000i128).unwrap(); // buy 1 base
//! match pair.swap_cross_range(size) {
//!     Ok(outcome) => println!("ends at tick {}, {} fills", outcome.tick, outcome.ticks.len()),
//!     Err(e) => println!("cannot fill: {e}"),
//! }
//! ```

pub use alloy_primitives::{Address, I256, U256};

pub mod config;
pub mod error;
pub mod events;
mod hash;
pub mod ledger;
pub mod math;
pub mod pair;
pub mod reconcile;
pub mod snapshot;
pub mod sync;

pub use error::{Error, Result};
pub use hash::{sorted_keys, FastMap};
pub use ledger::Ledger;

const U256_127: U256 = U256::from_limbs([127, 0, 0, 0]);
const U256_128: U256 = U256::from_limbs([128, 0, 0, 0]);
const U160_MAX: U256 = U256::from_limbs([0, 0, 4294967296, 0]);

pub const RESOLUTION: u8 = 96;
pub const Q96: U256 = U256::from_limbs([0, 4294967296, 0, 0]);
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Denominator of every basis-point ratio.
pub const RATIO_BASE: U256 = U256::from_limbs([10_000, 0, 0, 0]);
pub const SECONDS_PER_DAY: U256 = U256::from_limbs([86_400, 0, 0, 0]);

/// Expiry value of a perpetual pair.
pub const PERP_EXPIRY: u32 = u32::MAX;
/// Bitmap spacing of pearls; every tick may hold orders.
pub const PEARL_SPACING: i32 = 1;
/// Ranges must start and end on multiples of this.
pub const RANGE_SPACING: i32 = 50;
