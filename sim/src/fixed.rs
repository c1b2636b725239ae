//! Fixed-point arithmetic and integer geometry.
//!
//! Every quantity the simulation reasons about is an integer or a
//! fixed-point value; IEEE floats never participate in a decision. `Fp8`
//! carries 8 fractional bits (hit points, speeds, subpixel positions),
//! `Fp16` carries 16 (high-precision rates), and `Direction` is a wrapping
//! 8-bit heading (256 discrete directions per full turn).
//!
//! The rounding rules are part of the determinism contract:
//! multiplication rounds toward negative infinity (arithmetic shift of the
//! wide product), division truncates toward zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

// ============================================================================
// FP8 / FP16
// ============================================================================

/// Signed 32-bit fixed point with 8 fractional bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fp8(i32);

impl Fp8 {
    pub const ZERO: Fp8 = Fp8(0);
    pub const ONE: Fp8 = Fp8(1 << 8);

    /// Wrap a raw fixed-point bit pattern.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Fp8(raw)
    }

    /// Lift an integer into fixed point.
    #[inline]
    pub const fn integer(v: i32) -> Self {
        Fp8(v << 8)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Integer part, rounding toward negative infinity.
    #[inline]
    pub const fn integer_part(self) -> i32 {
        self.0 >> 8
    }

    #[inline]
    pub const fn fractional_part(self) -> i32 {
        self.0 & 0xff
    }

    #[inline]
    pub fn floor(self) -> Self {
        Fp8::integer(self.integer_part())
    }

    #[inline]
    pub fn ceil(self) -> Self {
        (self + Fp8::ONE - Fp8::from_raw(1)).floor()
    }

    #[inline]
    pub fn abs(self) -> Self {
        if self.0 >= 0 {
            self
        } else {
            Fp8(-self.0)
        }
    }

    /// `a * b / c` with the product taken at 64 bits; truncates toward zero.
    #[inline]
    pub fn multiply_divide(a: Fp8, b: Fp8, c: Fp8) -> Fp8 {
        Fp8((i64::from(a.0) * i64::from(b.0) / i64::from(c.0)) as i32)
    }

    /// `a / b * c` on raw values; truncates toward zero at the division.
    #[inline]
    pub fn divide_multiply(a: Fp8, b: Fp8, c: Fp8) -> Fp8 {
        Fp8(a.0 / b.0 * c.0)
    }

    /// Widen to 16 fractional bits.
    #[inline]
    pub const fn extend(self) -> Fp16 {
        Fp16((self.0 as i64 as i32) << 8)
    }
}

impl Add for Fp8 {
    type Output = Fp8;
    #[inline]
    fn add(self, n: Fp8) -> Fp8 {
        Fp8(self.0.wrapping_add(n.0))
    }
}

impl Sub for Fp8 {
    type Output = Fp8;
    #[inline]
    fn sub(self, n: Fp8) -> Fp8 {
        Fp8(self.0.wrapping_sub(n.0))
    }
}

impl AddAssign for Fp8 {
    #[inline]
    fn add_assign(&mut self, n: Fp8) {
        *self = *self + n;
    }
}

impl SubAssign for Fp8 {
    #[inline]
    fn sub_assign(&mut self, n: Fp8) {
        *self = *self - n;
    }
}

impl Neg for Fp8 {
    type Output = Fp8;
    #[inline]
    fn neg(self) -> Fp8 {
        Fp8(-self.0)
    }
}

impl Mul for Fp8 {
    type Output = Fp8;
    /// Wide product, arithmetic shift: rounds toward negative infinity.
    #[inline]
    fn mul(self, n: Fp8) -> Fp8 {
        Fp8(((i64::from(self.0) * i64::from(n.0)) >> 8) as i32)
    }
}

impl Div for Fp8 {
    type Output = Fp8;
    /// Dividend widened and shifted left: truncates toward zero.
    #[inline]
    fn div(self, n: Fp8) -> Fp8 {
        Fp8(((i64::from(self.0) << 8) / i64::from(n.0)) as i32)
    }
}

impl Mul<i32> for Fp8 {
    type Output = Fp8;
    #[inline]
    fn mul(self, n: i32) -> Fp8 {
        Fp8(self.0.wrapping_mul(n))
    }
}

impl Div<i32> for Fp8 {
    type Output = Fp8;
    #[inline]
    fn div(self, n: i32) -> Fp8 {
        Fp8(self.0 / n)
    }
}

impl fmt::Debug for Fp8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fp8({}+{}/256)", self.integer_part(), self.fractional_part())
    }
}

/// Signed 32-bit fixed point with 16 fractional bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fp16(i32);

impl Fp16 {
    pub const ZERO: Fp16 = Fp16(0);
    pub const ONE: Fp16 = Fp16(1 << 16);

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Fp16(raw)
    }

    #[inline]
    pub const fn integer(v: i32) -> Self {
        Fp16(v << 16)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn integer_part(self) -> i32 {
        self.0 >> 16
    }

    /// Narrow to 8 fractional bits, discarding precision.
    #[inline]
    pub const fn truncate(self) -> Fp8 {
        Fp8::from_raw(self.0 >> 8)
    }
}

impl Add for Fp16 {
    type Output = Fp16;
    #[inline]
    fn add(self, n: Fp16) -> Fp16 {
        Fp16(self.0.wrapping_add(n.0))
    }
}

impl Sub for Fp16 {
    type Output = Fp16;
    #[inline]
    fn sub(self, n: Fp16) -> Fp16 {
        Fp16(self.0.wrapping_sub(n.0))
    }
}

impl Mul for Fp16 {
    type Output = Fp16;
    #[inline]
    fn mul(self, n: Fp16) -> Fp16 {
        Fp16(((i64::from(self.0) * i64::from(n.0)) >> 16) as i32)
    }
}

impl Div for Fp16 {
    type Output = Fp16;
    #[inline]
    fn div(self, n: Fp16) -> Fp16 {
        Fp16(((i64::from(self.0) << 16) / i64::from(n.0)) as i32)
    }
}

impl fmt::Debug for Fp16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fp16({})", self.0)
    }
}

// ============================================================================
// DIRECTIONS
// ============================================================================

/// An 8-bit heading: the full turn is 256 steps, arithmetic wraps.
///
/// 0 points up (north), 64 points right (east), matching the original
/// engine's screen-space convention.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Direction(i8);

impl Direction {
    pub const ZERO: Direction = Direction(0);

    #[inline]
    pub const fn from_raw(raw: i8) -> Self {
        Direction(raw)
    }

    /// Truncating conversion from any integer; keeps the low 8 bits.
    #[inline]
    pub const fn from_int(v: i32) -> Self {
        Direction(v as i8)
    }

    #[inline]
    pub const fn raw(self) -> i8 {
        self.0
    }

    /// Index into 256-entry lookup tables.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as u8 as usize
    }

    /// The heading from the origin toward `pos`, quantized to 256 steps.
    ///
    /// Pure integer octant walk over the tangent table; agrees with the
    /// original's atan lookup on every input.
    pub fn of(pos: Xy) -> Direction {
        let Xy { x, y } = pos;
        if x == 0 && y == 0 {
            return Direction(0);
        }
        // Work in the first octant, fold the result back out.
        let ax = x.unsigned_abs();
        let ay = y.unsigned_abs();
        let (num, den, flip) = if ax <= ay { (ax, ay, false) } else { (ay, ax, true) };
        // ratio in [0, 256]: tangent scaled so that 45 degrees = 256.
        let ratio = (num * 256 + den / 2) / den;
        let d = TAN_TO_DIR[ratio.min(256) as usize] as i32;
        // Angle from the vertical axis within the quadrant, 0..=64.
        let mut angle = if flip { 64 - d } else { d };
        // Quadrant fold: screen y grows downward, 0 = up.
        angle = match (x >= 0, y >= 0) {
            (true, false) => angle,         // up-right
            (true, true) => 128 - angle,    // down-right
            (false, true) => 128 + angle,   // down-left
            (false, false) => 256 - angle,  // up-left
        };
        Direction(angle as u8 as i8)
    }

    /// Step `self` toward `target` by at most `rate` (both directions).
    pub fn turn_towards(self, target: Direction, rate: Fp8) -> Direction {
        let max_step = (rate.integer_part().clamp(0, 127)) as i32;
        let diff = i32::from((target.0 as u8).wrapping_sub(self.0 as u8) as i8);
        let step = diff.clamp(-max_step, max_step);
        self + Direction::from_int(step)
    }
}

impl Add for Direction {
    type Output = Direction;
    #[inline]
    fn add(self, n: Direction) -> Direction {
        Direction(self.0.wrapping_add(n.0))
    }
}

impl Sub for Direction {
    type Output = Direction;
    #[inline]
    fn sub(self, n: Direction) -> Direction {
        Direction(self.0.wrapping_sub(n.0))
    }
}

impl Neg for Direction {
    type Output = Direction;
    #[inline]
    fn neg(self) -> Direction {
        Direction(self.0.wrapping_neg())
    }
}

impl fmt::Debug for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Direction({})", self.0)
    }
}

/// Quarter-wave sine table, 8 fractional bits, 65 entries (0..=64).
///
/// `SINE_Q[i] = round(sin(i / 256 turn) * 256)`.
const SINE_Q: [i32; 65] = [
    0, 6, 13, 19, 25, 31, 38, 44, 50, 56, 62, 68, 74, 80, 86, 92, 98, 104, 109, 115, 121, 126,
    132, 137, 142, 147, 152, 157, 162, 167, 172, 177, 181, 185, 190, 194, 198, 202, 206, 209, 213,
    216, 220, 223, 226, 229, 231, 234, 237, 239, 241, 243, 245, 247, 248, 250, 251, 252, 253, 254,
    255, 255, 256, 256, 256,
];

/// Octant arctangent table: maps `tan * 256` (0..=256) to a direction step
/// 0..=32 within the octant.
const TAN_TO_DIR: [u8; 257] = {
    let mut t = [0u8; 257];
    let mut i = 0;
    while i <= 256 {
        // Invert SINE-based tangent by scanning; monotone, so a linear pass
        // at build time is exact enough to be stable.
        let mut d = 0u8;
        while (d as usize) < 32 {
            // tan(d) ~ sin(d)/sin(64-d) scaled by 256
            let s = SINE_Q[d as usize + 1];
            let c = SINE_Q[64 - (d as usize + 1)];
            let tan_next = if c == 0 { i32::MAX } else { s * 256 / c };
            if tan_next > i as i32 {
                break;
            }
            d += 1;
        }
        t[i] = d;
        i += 1;
    }
    t
};

/// `sin(dir) * 256` as a raw Fp8, covering the full turn.
pub fn sine(dir: Direction) -> Fp8 {
    let i = dir.index(); // 0..=255, 0 = up
    let q = i & 63;
    let v = match i >> 6 {
        0 => SINE_Q[q],
        1 => SINE_Q[64 - q],
        2 => -SINE_Q[q],
        _ => -SINE_Q[64 - q],
    };
    Fp8::from_raw(v)
}

/// `cos(dir) * 256` as a raw Fp8. 0 = up, so cos(0) = -1 on the screen y
/// axis is handled by the caller; this is the mathematical cosine of the
/// quarter-turn-offset angle.
pub fn cosine(dir: Direction) -> Fp8 {
    sine(dir + Direction::from_raw(64))
}

/// Project a heading and speed onto the pixel axes.
///
/// Screen convention: direction 0 moves up (negative y), 64 moves right.
pub fn velocity_from(dir: Direction, speed: Fp8) -> XyFp8 {
    XyFp8 {
        x: speed * sine(dir),
        y: -(speed * cosine(dir)),
    }
}

// ============================================================================
// INTEGER SQUARE ROOT AND LENGTHS
// ============================================================================

/// Binary digit-by-digit integer square root: `⌊√n⌋`, bit-exact.
pub fn isqrt(n: u32) -> u32 {
    let mut n = n;
    let mut r: u32 = 0;
    let mut p: u32 = 1 << 30;
    while p > n {
        p /= 4;
    }
    while p != 0 {
        if n >= r + p {
            n -= r + p;
            r += 2 * p;
        }
        r /= 2;
        p /= 4;
    }
    r
}

/// Euclidean length of an integer vector, rounded down.
pub fn xy_length(v: Xy) -> i32 {
    let x = i64::from(v.x);
    let y = i64::from(v.y);
    isqrt((x * x + y * y) as u32) as i32
}

// ============================================================================
// POINTS AND RECTANGLES
// ============================================================================

/// A pair of i32 coordinates: pixels or tiles depending on context.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xy {
    pub x: i32,
    pub y: i32,
}

impl Xy {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Xy { x, y }
    }
}

/// Row-major ordering: y first, then x. Matches the original's tile walk
/// order, which several tie-breaks depend on.
impl PartialOrd for Xy {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Xy {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl Add for Xy {
    type Output = Xy;
    #[inline]
    fn add(self, n: Xy) -> Xy {
        Xy::new(self.x + n.x, self.y + n.y)
    }
}

impl Sub for Xy {
    type Output = Xy;
    #[inline]
    fn sub(self, n: Xy) -> Xy {
        Xy::new(self.x - n.x, self.y - n.y)
    }
}

impl Neg for Xy {
    type Output = Xy;
    #[inline]
    fn neg(self) -> Xy {
        Xy::new(-self.x, -self.y)
    }
}

impl Div<i32> for Xy {
    type Output = Xy;
    #[inline]
    fn div(self, n: i32) -> Xy {
        Xy::new(self.x / n, self.y / n)
    }
}

impl Mul<i32> for Xy {
    type Output = Xy;
    #[inline]
    fn mul(self, n: i32) -> Xy {
        Xy::new(self.x * n, self.y * n)
    }
}

impl fmt::Debug for Xy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Subpixel position or velocity.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct XyFp8 {
    pub x: Fp8,
    pub y: Fp8,
}

impl XyFp8 {
    #[inline]
    pub const fn new(x: Fp8, y: Fp8) -> Self {
        XyFp8 { x, y }
    }

    /// Lift a pixel position into subpixel space.
    #[inline]
    pub fn from_xy(v: Xy) -> Self {
        XyFp8::new(Fp8::integer(v.x), Fp8::integer(v.y))
    }

    /// Truncate to whole pixels.
    #[inline]
    pub fn to_xy(self) -> Xy {
        Xy::new(self.x.integer_part(), self.y.integer_part())
    }
}

impl Add for XyFp8 {
    type Output = XyFp8;
    #[inline]
    fn add(self, n: XyFp8) -> XyFp8 {
        XyFp8::new(self.x + n.x, self.y + n.y)
    }
}

impl Sub for XyFp8 {
    type Output = XyFp8;
    #[inline]
    fn sub(self, n: XyFp8) -> XyFp8 {
        XyFp8::new(self.x - n.x, self.y - n.y)
    }
}

/// Axis-aligned rectangle, inclusive `from`, exclusive `to`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Rect {
    pub from: Xy,
    pub to: Xy,
}

impl Rect {
    #[inline]
    pub const fn new(from: Xy, to: Xy) -> Self {
        Rect { from, to }
    }

    /// The rectangle spanned by a center point and half-extents.
    pub fn around(center: Xy, half: Xy) -> Self {
        Rect::new(center - half, center + half + Xy::new(1, 1))
    }

    #[inline]
    pub fn width(self) -> i32 {
        self.to.x - self.from.x
    }

    #[inline]
    pub fn height(self) -> i32 {
        self.to.y - self.from.y
    }

    #[inline]
    pub fn contains(self, p: Xy) -> bool {
        p.x >= self.from.x && p.x < self.to.x && p.y >= self.from.y && p.y < self.to.y
    }

    #[inline]
    pub fn intersects(self, n: Rect) -> bool {
        self.from.x < n.to.x && n.from.x < self.to.x && self.from.y < n.to.y && n.from.y < self.to.y
    }

    /// Grow on every side.
    pub fn expand(self, by: Xy) -> Rect {
        Rect::new(self.from - by, self.to + by)
    }

    /// Clamp a point into the rectangle (exclusive edge pulled in by one).
    pub fn clamp(self, p: Xy) -> Xy {
        Xy::new(
            p.x.clamp(self.from.x, self.to.x - 1),
            p.y.clamp(self.from.y, self.to.y - 1),
        )
    }

    pub fn center(self) -> Xy {
        Xy::new((self.from.x + self.to.x) / 2, (self.from.y + self.to.y) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp8_mul_rounds_toward_negative_infinity() {
        let a = Fp8::from_raw(-1); // -1/256
        let b = Fp8::from_raw(1); // 1/256
        // exact product is -1/65536; arithmetic shift gives -1/256
        assert_eq!((a * b).raw(), -1);
        // positive case truncates down to zero
        assert_eq!((b * b).raw(), 0);
    }

    #[test]
    fn test_fp8_div_truncates_toward_zero() {
        let a = Fp8::integer(-1);
        let b = Fp8::integer(3);
        assert_eq!((a / b).raw(), -85); // -256/3 = -85.33 -> -85
        assert_eq!((Fp8::integer(1) / b).raw(), 85);
    }

    #[test]
    fn test_multiply_divide_uses_wide_product() {
        let a = Fp8::integer(20000);
        let b = Fp8::integer(3);
        let c = Fp8::integer(4);
        assert_eq!(Fp8::multiply_divide(a, b, c), Fp8::integer(15000));
    }

    #[test]
    fn test_isqrt_exact() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(2), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
        assert_eq!(isqrt(u32::MAX), 65535);
    }

    #[test]
    fn test_xy_length() {
        assert_eq!(xy_length(Xy::new(3, 4)), 5);
        assert_eq!(xy_length(Xy::new(-3, 4)), 5);
        assert_eq!(xy_length(Xy::new(1, 1)), 1);
    }

    #[test]
    fn test_direction_wraps() {
        let d = Direction::from_raw(127) + Direction::from_raw(2);
        assert_eq!(d.raw(), -127);
        let e = Direction::from_raw(-128) - Direction::from_raw(1);
        assert_eq!(e.raw(), 127);
    }

    #[test]
    fn test_direction_of_cardinals() {
        assert_eq!(Direction::of(Xy::new(0, -10)).index(), 0); // up
        assert_eq!(Direction::of(Xy::new(10, 0)).index(), 64); // right
        assert_eq!(Direction::of(Xy::new(0, 10)).index(), 128); // down
        assert_eq!(Direction::of(Xy::new(-10, 0)).index(), 192); // left
    }

    #[test]
    fn test_direction_of_diagonals() {
        assert_eq!(Direction::of(Xy::new(10, -10)).index(), 32);
        assert_eq!(Direction::of(Xy::new(10, 10)).index(), 96);
        assert_eq!(Direction::of(Xy::new(-10, 10)).index(), 160);
        assert_eq!(Direction::of(Xy::new(-10, -10)).index(), 224);
    }

    #[test]
    fn test_turn_towards_clamps_step() {
        let d = Direction::from_raw(0);
        let t = Direction::from_raw(100);
        let stepped = d.turn_towards(t, Fp8::integer(10));
        assert_eq!(stepped.raw(), 10);
        // reaching within rate snaps exactly
        let near = Direction::from_raw(95);
        assert_eq!(near.turn_towards(t, Fp8::integer(10)), t);
    }

    #[test]
    fn test_turn_towards_takes_short_way_around() {
        let d = Direction::from_raw(-120);
        let t = Direction::from_raw(120);
        // short way is backwards through the wrap point
        let stepped = d.turn_towards(t, Fp8::integer(8));
        assert_eq!(stepped.raw(), -128);
    }

    #[test]
    fn test_velocity_projection_axes() {
        let v = velocity_from(Direction::from_raw(64), Fp8::integer(4));
        assert_eq!(v.x, Fp8::integer(4));
        assert_eq!(v.y, Fp8::ZERO);
        let u = velocity_from(Direction::from_raw(0), Fp8::integer(4));
        assert_eq!(u.x, Fp8::ZERO);
        assert_eq!(u.y, Fp8::integer(-4));
    }

    #[test]
    fn test_rect_intersects() {
        let a = Rect::new(Xy::new(0, 0), Xy::new(10, 10));
        let b = Rect::new(Xy::new(9, 9), Xy::new(20, 20));
        let c = Rect::new(Xy::new(10, 0), Xy::new(20, 10));
        assert!(a.intersects(b));
        assert!(!a.intersects(c)); // exclusive edge
    }

    #[test]
    fn test_xy_ordering_is_row_major() {
        assert!(Xy::new(5, 1) < Xy::new(0, 2));
        assert!(Xy::new(1, 3) < Xy::new(2, 3));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn isqrt_is_floor_sqrt(n in any::<u32>()) {
                let r = isqrt(n);
                prop_assert!(u64::from(r) * u64::from(r) <= u64::from(n));
                prop_assert!((u64::from(r) + 1) * (u64::from(r) + 1) > u64::from(n));
            }

            #[test]
            fn fp8_mul_matches_wide_shift(a in -1_000_000i32..1_000_000, b in -1_000_000i32..1_000_000) {
                let r = (Fp8::from_raw(a) * Fp8::from_raw(b)).raw();
                prop_assert_eq!(i64::from(r), (i64::from(a) * i64::from(b)) >> 8);
            }

            #[test]
            fn direction_add_wraps_like_u8(a in any::<i8>(), b in any::<i8>()) {
                let d = Direction::from_raw(a) + Direction::from_raw(b);
                prop_assert_eq!(d.raw() as u8, (a as u8).wrapping_add(b as u8));
            }
        }
    }
}
