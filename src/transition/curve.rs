//! Easing curves
//!
//! Curves map animation progress in `[0, 1]` to an eased fraction. Three
//! shapes are supported, mirroring CSS timing functions:
//!
//! - `linear`
//! - `cubic-bezier(x1, y1, x2, y2)`
//! - `steps(n, jump-start | jump-end | jump-both | jump-none)`

use thiserror::Error;

/// Error produced when a curve description cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CurveError(pub String);

/// An easing curve.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Curve {
    #[default]
    Linear,
    /// Polynomial coefficients of a cubic bezier through (0,0) and (1,1).
    CubicBezier {
        ax: f64,
        bx: f64,
        cx: f64,
        ay: f64,
        by: f64,
        cy: f64,
    },
    Step {
        steps: u32,
        jump_start: bool,
        jump_end: bool,
    },
}

const NEWTON_ITERATIONS: usize = 8;
const SOLVE_EPSILON: f64 = 1e-7;
const DERIVATIVE_EPSILON: f64 = 1e-6;

impl Curve {
    /// Builds a cubic bezier from its two control points.
    pub fn cubic_bezier(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let cx = 3.0 * x1;
        let bx = 3.0 * (x2 - x1) - cx;
        let cy = 3.0 * y1;
        let by = 3.0 * (y2 - y1) - cy;
        Curve::CubicBezier {
            ax: 1.0 - cx - bx,
            bx,
            cx,
            ay: 1.0 - cy - by,
            by,
            cy,
        }
    }

    pub fn steps(steps: u32, jump_start: bool, jump_end: bool) -> Self {
        Curve::Step {
            steps,
            jump_start,
            jump_end,
        }
    }

    /// Samples the curve. `progress` must be in `[0, 1]`.
    pub fn sample(&self, progress: f64) -> f64 {
        debug_assert!((0.0..=1.0).contains(&progress));
        match *self {
            Curve::Linear => progress,
            Curve::CubicBezier { .. } => {
                if progress == 0.0 || progress == 1.0 {
                    return progress;
                }
                let t = self.bezier_solve_x(progress);
                self.bezier_sample_y(t)
            }
            Curve::Step {
                steps,
                jump_start,
                jump_end,
            } => {
                let y_steps =
                    (i64::from(steps) - 1 + i64::from(jump_end) + i64::from(jump_start)) as f64;
                if progress == 1.0 {
                    return 1.0;
                }
                if progress == 0.0 {
                    return if jump_start { 1.0 / y_steps } else { 0.0 };
                }
                let scaled = progress * steps as f64;
                let quantized = if jump_start {
                    scaled.ceil()
                } else {
                    scaled.floor()
                };
                quantized / y_steps
            }
        }
    }

    fn bezier_sample_x(&self, t: f64) -> f64 {
        match *self {
            Curve::CubicBezier { ax, bx, cx, .. } => ((ax * t + bx) * t + cx) * t,
            _ => t,
        }
    }

    fn bezier_sample_y(&self, t: f64) -> f64 {
        match *self {
            Curve::CubicBezier { ay, by, cy, .. } => ((ay * t + by) * t + cy) * t,
            _ => t,
        }
    }

    fn bezier_derivative_x(&self, t: f64) -> f64 {
        match *self {
            Curve::CubicBezier { ax, bx, cx, .. } => (3.0 * ax * t + 2.0 * bx) * t + cx,
            _ => 1.0,
        }
    }

    /// Finds the bezier parameter `t` whose x coordinate is `x`. Newton's
    /// method first, bisection when it fails to converge.
    fn bezier_solve_x(&self, x: f64) -> f64 {
        let mut t = x;
        for _ in 0..NEWTON_ITERATIONS {
            let x2 = self.bezier_sample_x(t);
            if (x2 - x).abs() < SOLVE_EPSILON {
                return t;
            }
            let dx = self.bezier_derivative_x(t);
            if dx.abs() < DERIVATIVE_EPSILON {
                break;
            }
            t -= (x2 - x) / dx;
        }

        let (mut low, mut high) = (0.0, 1.0);
        t = x;
        while high - low > SOLVE_EPSILON {
            let x2 = self.bezier_sample_x(t);
            if (x2 - x).abs() < SOLVE_EPSILON {
                return t;
            }
            if x > x2 {
                low = t;
            } else {
                high = t;
            }
            t = (high - low) / 2.0 + low;
        }
        t
    }

    /// Parses a curve description, returning the curve and the unparsed
    /// remainder of the input.
    pub fn parse(input: &str) -> Result<(Curve, &str), CurveError> {
        let s = input.trim_start();
        type Parser = fn(&str) -> Result<(Curve, &str), CurveError>;
        let parsers: [(&str, Parser); 3] = [
            ("cubic-bezier", parse_cubic_bezier),
            ("linear", |rest| Ok((Curve::Linear, rest))),
            ("steps", parse_steps),
        ];
        for (name, parse) in parsers {
            if let Some(rest) = strip_prefix_ignore_case(s, name) {
                return parse(rest);
            }
        }
        Err(CurveError(format!("Unknown curve type \"{}\".", s)))
    }
}

impl std::str::FromStr for Curve {
    type Err = CurveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Curve::parse(s).map(|(curve, _)| curve)
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Parses a plain decimal number: optional sign, digits, optional fraction.
/// No exponent, no whitespace. Returns the value and the remaining input.
pub(crate) fn parse_simple_number(s: &str) -> Option<(f64, &str)> {
    let bytes = s.as_bytes();
    let mut pos = usize::from(matches!(bytes.first(), Some(b'-' | b'+')));
    let mut digits = false;
    while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
        digits = true;
        pos += 1;
    }
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
            digits = true;
            pos += 1;
        }
    }
    if !digits {
        return None;
    }
    let value = s[..pos].parse().ok()?;
    Some((value, &s[pos..]))
}

fn parse_steps(input: &str) -> Result<(Curve, &str), CurveError> {
    let invalid_list = || CurveError(format!("Invalid steps argument list \"{}\".", input));
    let Some(s) = input.strip_prefix('(') else {
        return Err(CurveError(format!("Invalid steps {}.", input)));
    };
    let s = s.trim_start();
    let digits = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    let steps: u32 = match s[..digits].parse::<i64>() {
        Ok(n) if n <= i64::from(i32::MAX) && n >= 0 => n as u32,
        _ => return Err(CurveError(format!("Invalid step count at \"{}\".", s))),
    };
    let s = s[digits..].trim_start();
    let Some(s) = s.strip_prefix(',') else {
        return Err(invalid_list());
    };
    let s = s.trim_start();
    let (jump_start, jump_end, len) = if strip_prefix_ignore_case(s, "jump-start").is_some() {
        (true, false, "jump-start".len())
    } else if strip_prefix_ignore_case(s, "jump-end").is_some() {
        (false, true, "jump-end".len())
    } else if strip_prefix_ignore_case(s, "jump-both").is_some() {
        (true, true, "jump-both".len())
    } else if strip_prefix_ignore_case(s, "jump-none").is_some() {
        (false, false, "jump-none".len())
    } else {
        return Err(CurveError(format!(
            "Invalid jump setting for steps \"{}\".",
            s
        )));
    };
    let s = s[len..].trim_start();
    let Some(rest) = s.strip_prefix(')') else {
        return Err(invalid_list());
    };
    Ok((Curve::steps(steps, jump_start, jump_end), rest))
}

fn parse_cubic_bezier(input: &str) -> Result<(Curve, &str), CurveError> {
    let Some(mut s) = input.strip_prefix('(') else {
        return Err(CurveError(format!("Invalid cubic-bazier {}.", input)));
    };
    let mut numbers = [0.0; 4];
    for (i, number) in numbers.iter_mut().enumerate() {
        s = s.trim_start();
        let Some((value, rest)) = parse_simple_number(s) else {
            return Err(CurveError(format!("Invalid number {}.", s)));
        };
        *number = value;
        s = rest.trim_start();
        let expected = if i == 3 { ')' } else { ',' };
        let Some(rest) = s.strip_prefix(expected) else {
            return Err(CurveError(format!(
                "Invalid cubic-bazier argument list {}.",
                input
            )));
        };
        s = rest;
    }
    Ok((
        Curve::cubic_bezier(numbers[0], numbers[1], numbers[2], numbers[3]),
        s,
    ))
}
