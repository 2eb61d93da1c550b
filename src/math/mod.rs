pub mod math_helpers;
pub mod fixed_point;
pub mod sqrt_price_math;
pub mod swap_math;
pub mod tick_bitmap;
pub mod tick_math;

pub mod bit_math;

pub mod funding;
pub mod liquidity_math;
