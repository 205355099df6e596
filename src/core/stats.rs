/// Linear-interpolated percentile; sorts `values` in place. `p` is in percent.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    percentile_of_sorted(values, p)
}

pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// For each period column of a trials x periods matrix, the requested
/// percentiles across trials. Returns one series per percentile.
pub fn percentile_bands(paths: &[Vec<f64>], percentiles: &[f64]) -> Vec<Vec<f64>> {
    let periods = paths.iter().map(Vec::len).min().unwrap_or(0);
    let mut bands = vec![Vec::with_capacity(periods); percentiles.len()];
    let mut column = Vec::with_capacity(paths.len());

    for period in 0..periods {
        column.clear();
        column.extend(paths.iter().map(|path| path[period]));
        column.sort_by(|a, b| a.total_cmp(b));
        for (band, &p) in bands.iter_mut().zip(percentiles) {
            band.push(percentile_of_sorted(&column, p));
        }
    }

    bands
}

/// Column means of a trials x periods matrix.
pub fn column_means(paths: &[Vec<f64>]) -> Vec<f64> {
    let periods = paths.iter().map(Vec::len).min().unwrap_or(0);
    (0..periods)
        .map(|period| paths.iter().map(|path| path[period]).sum::<f64>() / paths.len() as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        assert_approx(percentile(&mut values, 25.0), 1.75);
        assert_approx(percentile(&mut values, 50.0), 2.5);
        assert_approx(percentile(&mut values, 100.0), 4.0);
    }

    #[test]
    fn percentile_of_empty_and_single() {
        let mut empty: Vec<f64> = Vec::new();
        assert_approx(percentile(&mut empty, 50.0), 0.0);
        let mut single = vec![7.0];
        assert_approx(percentile(&mut single, 90.0), 7.0);
    }

    #[test]
    fn bands_are_computed_per_column() {
        let paths = vec![vec![1.0, 10.0], vec![3.0, 30.0], vec![2.0, 20.0]];
        let bands = percentile_bands(&paths, &[0.0, 50.0, 100.0]);
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[0], vec![1.0, 10.0]);
        assert_eq!(bands[1], vec![2.0, 20.0]);
        assert_eq!(bands[2], vec![3.0, 30.0]);
        assert_eq!(column_means(&paths), vec![2.0, 20.0]);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_lower_percentile_never_exceeds_higher(
            values in vec(-1e6f64..1e6, 1..60),
            lo in 0.0f64..50.0,
            hi in 50.0f64..100.0
        ) {
            let mut sorted = values.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            prop_assert!(percentile_of_sorted(&sorted, lo) <= percentile_of_sorted(&sorted, hi) + 1e-6);
        }
    }
}
