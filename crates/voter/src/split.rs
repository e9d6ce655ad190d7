//! Largest-remainder weight allocation
//!
//! Splitting a power snapshot across pools must be exact: the per-pool
//! amounts always sum to the snapshot, whatever the relative weights.
//! Truncated shares are computed first, then the leftover units go one by
//! one to the entries with the largest fractional remainders, ties broken
//! by position in the voted list.

use vetoken_types::{mul_div_u128, TokenAmount};

/// Split `total` across relative `weights`, exactly.
///
/// All-zero weight vectors are treated as equal weights, so callers never
/// lose amount to a degenerate selection.
pub fn split_by_weights(total: TokenAmount, weights: &[u128]) -> Vec<TokenAmount> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: u128 = weights.iter().sum();
    if sum == 0 {
        let ones = vec![1u128; weights.len()];
        return split_by_weights(total, &ones);
    }

    let mut shares: Vec<TokenAmount> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, u128)> = Vec::with_capacity(weights.len());
    let mut assigned: u128 = 0;
    for (i, &w) in weights.iter().enumerate() {
        let share = mul_div_u128(total, w, sum).unwrap_or(0);
        let frac = total
            .checked_mul(w)
            .map(|product| product % sum)
            .unwrap_or(0);
        assigned = assigned.saturating_add(share);
        shares.push(share);
        remainders.push((i, frac));
    }

    let mut leftover = total.saturating_sub(assigned);
    if leftover > 0 {
        remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        // One pass suffices for remainders of truncating division; the
        // wrap-around only guards overflow-clamped shares
        let mut next = 0usize;
        while leftover > 0 {
            let (i, _) = remainders[next % remainders.len()];
            shares[i] = shares[i].saturating_add(1);
            leftover -= 1;
            next += 1;
        }
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        assert_eq!(split_by_weights(100, &[1, 1]), vec![50, 50]);
        assert_eq!(split_by_weights(100, &[1, 3]), vec![25, 75]);
    }

    #[test]
    fn test_remainder_goes_to_largest_fraction() {
        // 100 over [1,1,1]: 33 each, remainder 1 to the first (all tied)
        assert_eq!(split_by_weights(100, &[1, 1, 1]), vec![34, 33, 33]);
        // 10 over [2,3,5]: exact
        assert_eq!(split_by_weights(10, &[2, 3, 5]), vec![2, 3, 5]);
    }

    #[test]
    fn test_sum_is_exact() {
        for total in [0u128, 1, 7, 99, 1_000_003] {
            for weights in [vec![1u128, 2, 3], vec![7, 11], vec![5], vec![3, 3, 3, 1]] {
                let shares = split_by_weights(total, &weights);
                assert_eq!(shares.iter().sum::<u128>(), total);
            }
        }
    }

    #[test]
    fn test_zero_weights_fall_back_to_equal() {
        assert_eq!(split_by_weights(9, &[0, 0, 0]), vec![3, 3, 3]);
    }

    #[test]
    fn test_empty() {
        assert!(split_by_weights(10, &[]).is_empty());
    }
}
