use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{QuantiseSettings, Weight};

/// Replaces every value with an index into a table of at most `2^bits` centroids.
pub fn palettise(shape: &[usize], values: &[f32], bits: u8, settings: &QuantiseSettings) -> Weight {
    let k = 1usize << bits;

    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);

    let mut distinct = sorted.clone();
    distinct.dedup();

    let lut = if distinct.len() <= k { distinct } else { cluster(&sorted, k, settings) };
    let indices = values.iter().map(|&x| nearest(&lut, x) as u8).collect();

    Weight::Palette { shape: shape.to_vec(), bits, lut, indices }
}

/// Index of the centroid closest to `x`, the lower one on ties. `lut` must be sorted.
fn nearest(lut: &[f32], x: f32) -> usize {
    let idx = lut.partition_point(|&c| c < x);

    if idx == 0 {
        0
    } else if idx == lut.len() || f64::from(x) - f64::from(lut[idx - 1]) <= f64::from(lut[idx]) - f64::from(x) {
        idx - 1
    } else {
        idx
    }
}

/// Lloyd's algorithm over sorted 1-D data, seeded with k-means++.
fn cluster(sorted: &[f32], k: usize, settings: &QuantiseSettings) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut centroids = init_plus_plus(sorted, k, &mut rng);

    // prefix[i] = sum of sorted[..i]
    let mut prefix = Vec::with_capacity(sorted.len() + 1);
    prefix.push(0.0f64);
    for &x in sorted {
        prefix.push(prefix[prefix.len() - 1] + f64::from(x));
    }

    let mut bounds = boundaries(sorted, &centroids);

    for iter in 0..settings.max_iters {
        let mut start = 0;
        for (centroid, &end) in centroids.iter_mut().zip(&bounds) {
            if end > start {
                *centroid = ((prefix[end] - prefix[start]) / (end - start) as f64) as f32;
            }
            start = end;
        }

        centroids.sort_by(f32::total_cmp);

        let next = boundaries(sorted, &centroids);
        if next == bounds {
            tracing::trace!("k-means converged after {} iterations", iter + 1);
            break;
        }

        bounds = next;
    }

    centroids
}

/// End of each centroid's contiguous run of sorted values.
fn boundaries(sorted: &[f32], centroids: &[f32]) -> Vec<usize> {
    let mut bounds: Vec<usize> =
        centroids.windows(2).map(|w| sorted.partition_point(|&x| x <= w[0] / 2.0 + w[1] / 2.0)).collect();

    bounds.push(sorted.len());
    bounds
}

fn init_plus_plus(sorted: &[f32], k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(sorted[rng.gen_range(0..sorted.len())]);

    let mut dist: Vec<f64> = sorted.iter().map(|&x| (f64::from(x) - f64::from(centroids[0])).powi(2)).collect();

    while centroids.len() < k {
        let total: f64 = dist.iter().sum();
        let target = rng.gen::<f64>() * total;

        let mut acc = 0.0;
        let mut chosen = dist.iter().rposition(|&d| d > 0.0).unwrap_or(0);
        for (i, &d) in dist.iter().enumerate() {
            acc += d;
            if d > 0.0 && acc > target {
                chosen = i;
                break;
            }
        }

        let centroid = sorted[chosen];
        centroids.push(centroid);

        for (d, &x) in dist.iter_mut().zip(sorted) {
            *d = d.min((f64::from(x) - f64::from(centroid)).powi(2));
        }
    }

    centroids.sort_by(f32::total_cmp);
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack(weight: &Weight) -> (&[f32], &[u8]) {
        match weight {
            Weight::Palette { lut, indices, .. } => (lut.as_slice(), indices.as_slice()),
            _ => panic!("expected palette weight"),
        }
    }

    #[test]
    fn few_distinct_values_are_lossless() {
        let values = [0.5, -2.0, 0.5, 3.0, -2.0, 3.0, 0.5];
        let weight = palettise(&[7], &values, 2, &QuantiseSettings::default());
        let (lut, indices) = unpack(&weight);

        assert_eq!(lut, &[-2.0, 0.5, 3.0]);
        assert_eq!(indices, &[1, 0, 1, 2, 0, 2, 1]);
    }

    #[test]
    fn separated_groups_find_their_means() {
        let values = [-10.0, -10.5, -9.5, 20.0, 21.0, 19.0, 20.0];
        let weight = palettise(&[values.len()], &values, 1, &QuantiseSettings::default());
        let (lut, indices) = unpack(&weight);

        assert_eq!(lut.len(), 2);
        assert!((lut[0] + 10.0).abs() < 1e-5);
        assert!((lut[1] - 20.0).abs() < 1e-5);
        assert_eq!(indices, &[0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn same_seed_same_palette() {
        let values: Vec<f32> = (0..500).map(|i| ((i * 7919 % 500) as f32).sqrt()).collect();
        let settings = QuantiseSettings { seed: 42, max_iters: 20 };

        let a = palettise(&[20, 25], &values, 3, &settings);
        let b = palettise(&[20, 25], &values, 3, &settings);
        assert_eq!(a, b);

        let (lut, indices) = unpack(&a);
        assert_eq!(lut.len(), 8);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
        assert!(indices.iter().all(|&i| i < 8));
    }

    #[test]
    fn nearest_prefers_lower_on_ties() {
        let lut = [0.0, 1.0, 2.0];

        assert_eq!(nearest(&lut, -5.0), 0);
        assert_eq!(nearest(&lut, 0.5), 0);
        assert_eq!(nearest(&lut, 0.6), 1);
        assert_eq!(nearest(&lut, 7.0), 2);
    }
}
