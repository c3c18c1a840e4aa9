/// Returns `part / whole`, or 0.0 when `whole` is zero.
pub(crate) fn safe_ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Mean of a sum over `count` items, 0.0 for an empty set.
pub(crate) fn mean_of(total: f64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { total / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_never_divide_by_zero() {
        assert_eq!(safe_ratio(3, 0), 0.0);
        assert_eq!(safe_ratio(1, 4), 0.25);
        assert_eq!(mean_of(10.0, 0), 0.0);
        assert_eq!(mean_of(10.0, 4), 2.5);
    }
}
