//! AUC and lift evaluation from cached `w·x` scores.

use crate::data::ShardSet;

/// Tie-aware AUC plus lift at the given fractions.
///
/// `wxs` holds one cached `w·x` per row, in shard order. Lift inside a tie
/// group is linearly interpolated and normalized by the random-model
/// baseline. Degenerate single-class data yields an AUC of 0.
pub fn auc_and_lift(
    shard_set: &ShardSet,
    wxs: &[f64],
    lift_fractions: &[f64],
) -> (f64, Vec<f64>) {
    let data_size = wxs.len();
    assert_eq!(shard_set.stats().row_count() as usize, data_size);

    // (wx, is_positive) pairs, sorted best-score-first for the sweep.
    let mut wx_row_ordering: Vec<(f64, bool)> = Vec::with_capacity(data_size);
    let mut index = 0;
    for shard in shard_set.shards() {
        for i in 0..shard.row_count() as usize {
            wx_row_ordering.push((wxs[index], shard.ys()[i] == 1.0));
            index += 1;
        }
    }
    wx_row_ordering.sort_unstable_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.cmp(&a.1))
    });

    let mut auc = 0.0f64;
    let mut lift_values = vec![0.0; lift_fractions.len()];

    let mut i = 0usize; // rows 0..i are consumed
    let mut x = 0u64; // false positives so far
    let mut y = 0u64; // true positives so far
    let mut lift_index = 0usize;
    // Invariant: x + y == i.
    while i < data_size {
        // Advance over the whole tie group at this score.
        let wx = wx_row_ordering[i].0;
        let mut i_new = i;
        while i_new < data_size && wx_row_ordering[i_new].0 == wx {
            i_new += 1;
        }
        let mut x_new = x;
        let mut y_new = y;
        for pair in &wx_row_ordering[i..i_new] {
            if pair.1 {
                y_new += 1;
            } else {
                x_new += 1;
            }
        }
        // Trapezoid over the tie group, doubled; halved at the end.
        auc += ((y_new + y) * (x_new - x)) as f64;

        while lift_index < lift_fractions.len() {
            let fraction = lift_fractions[lift_index];
            let i_lift = data_size as f64 * fraction;
            if i_lift <= i as f64 || i_lift > i_new as f64 {
                break;
            }
            // i_lift lies in (i, i_new]: interpolate on the segment from
            // (i, y) to (i_new, y_new).
            let lambda = (i_lift - i as f64) / (i_new - i) as f64;
            let y_lift = y as f64 + (y_new - y) as f64 * lambda;
            lift_values[lift_index] = y_lift / fraction;
            lift_index += 1;
        }

        i = i_new;
        x = x_new;
        y = y_new;
    }

    if x == 0 || y == 0 {
        return (0.0, vec![0.0; lift_fractions.len()]);
    }
    for lift in &mut lift_values {
        *lift /= y as f64;
    }
    auc /= (2 * x * y) as f64;
    (auc, lift_values)
}
