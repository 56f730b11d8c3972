// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Cryptographic sortition, after section 5 of the Algorand paper.
//!
//! Every unit of stake is an independent Bernoulli trial that wins with probability
//! `p = expected / total_stake`. The number of units a validator wins is therefore
//! `Binomial(stake, p)`; the VRF output picks a point on that distribution's CDF.

use hotpokt_types::{
    block::BlockHash,
    validator::StakeAmount,
    view::{Height, Round},
    vrf::{VrfOutput, VRF_OUTPUT_LEN},
};
use num::{BigUint, ToPrimitive};

/// Number of stake units won with `vrf_output`; 0 means not selected.
#[must_use]
pub fn sortition(
    validator_stake: StakeAmount,
    total_stake: StakeAmount,
    num_expected: u64,
    vrf_output: &VrfOutput,
) -> u64 {
    if validator_stake == 0 || total_stake == 0 || num_expected == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let p = num_expected as f64 / total_stake as f64;
    if p >= 1.0 {
        return validator_stake;
    }
    binomial_cdf_walk(validator_stake, p, vrf_output_ratio(vrf_output))
}

/// The seed every validator proves for a view: `"{height}:{round}:{prev_block_hash}"`
#[must_use]
pub fn view_seed(height: Height, round: Round, prev_block_hash: &BlockHash) -> Vec<u8> {
    format!("{height}:{round}:{prev_block_hash}").into_bytes()
}

/// Map an output, read as a big-endian integer, onto `[0, 1]` by dividing by the largest
/// representable output.
#[must_use]
pub fn vrf_output_ratio(vrf_output: &VrfOutput) -> f64 {
    let value = BigUint::from_bytes_be(vrf_output.as_bytes());
    let max = BigUint::from_bytes_be(&[u8::MAX; VRF_OUTPUT_LEN]);
    match (value.to_f64(), max.to_f64()) {
        (Some(value), Some(max)) if max > 0.0 => (value / max).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

/// First `j` in `0..n` with `CDF(j; n, p) >= ratio`, or `n`.
///
/// The pmf is advanced with `pmf(j+1) = pmf(j) * (n-j)/(j+1) * p/(1-p)` starting from
/// `pmf(0) = (1-p)^n`, evaluated in log space so large stakes do not underflow.
fn binomial_cdf_walk(n: u64, p: f64, ratio: f64) -> u64 {
    #[allow(clippy::cast_precision_loss)]
    let n_f = n as f64;
    let mean = n_f * p;
    let odds = p / (1.0 - p);

    let mut pmf = (n_f * (-p).ln_1p()).exp();
    let mut cdf = pmf;
    for j in 0..n {
        if ratio <= cdf {
            return j;
        }
        #[allow(clippy::cast_precision_loss)]
        let j_f = j as f64;
        pmf *= (n_f - j_f) / (j_f + 1.0) * odds;
        // past the mode the remaining mass is below f64 resolution
        if j_f > mean && (pmf == 0.0 || cdf + pmf == cdf) {
            return j + 1;
        }
        cdf += pmf;
    }
    n
}

#[cfg(test)]
mod test {
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    /// Minimum stake of a validator, in micro units
    const MIN_STAKE: u64 = 15_000 * 1_000_000;
    /// Allowed deviation, as a fraction of the number of trials
    const ERR_THRESHOLD: f64 = 0.05;

    fn random_output(rng: &mut ChaCha20Rng) -> VrfOutput {
        let mut bytes = [0u8; VRF_OUTPUT_LEN];
        rng.fill_bytes(&mut bytes);
        VrfOutput(bytes)
    }

    fn assert_proportional(stake: u64, total: u64, trials: u64, expected_leaders: u64) {
        let mut rng = ChaCha20Rng::seed_from_u64(stake ^ trials ^ expected_leaders);
        let selected: u64 = (0..trials)
            .map(|_| sortition(stake, total, expected_leaders, &random_output(&mut rng)))
            .sum();

        #[allow(clippy::cast_precision_loss)]
        let tolerance = trials as f64 * ERR_THRESHOLD;
        #[allow(clippy::cast_precision_loss)]
        let expected = (trials * expected_leaders) as f64 * (stake as f64 / total as f64);
        #[allow(clippy::cast_precision_loss)]
        let delta = (selected as f64 - expected).abs();
        assert!(
            delta <= tolerance,
            "stake {stake}/{total} over {trials} trials: selected {selected}, expected {expected}"
        );
    }

    #[test]
    fn selections_are_proportional_to_stake() {
        let network_stake = MIN_STAKE * 1000;
        for (stake, trials, expected_leaders) in [
            (MIN_STAKE, 100, 1),
            (MIN_STAKE, 1000, 1),
            (MIN_STAKE, 10_000, 1),
            (MIN_STAKE * 5, 100, 3),
            (MIN_STAKE * 10, 1000, 3),
            (MIN_STAKE * 100, 10_000, 3),
            (MIN_STAKE * 5, 100, 10),
            (MIN_STAKE * 10, 1000, 10),
            (MIN_STAKE * 100, 10_000, 10),
        ] {
            assert_proportional(stake, network_stake, trials, expected_leaders);
        }
    }

    #[test]
    fn output_extremes_map_to_distribution_ends() {
        let zero = VrfOutput([0; VRF_OUTPUT_LEN]);
        let max = VrfOutput([u8::MAX; VRF_OUTPUT_LEN]);
        assert!(vrf_output_ratio(&zero).abs() < f64::EPSILON);
        assert!((vrf_output_ratio(&max) - 1.0).abs() < f64::EPSILON);

        assert_eq!(sortition(100, 1000, 3, &zero), 0);
        let top = sortition(100, 1000, 3, &max);
        assert!(top > 0 && top <= 100);
    }

    #[test]
    fn degenerate_inputs() {
        let output = VrfOutput([0x80; VRF_OUTPUT_LEN]);
        assert_eq!(sortition(0, 1000, 3, &output), 0);
        assert_eq!(sortition(10, 0, 3, &output), 0);
        assert_eq!(sortition(10, 1000, 0, &output), 0);
        // more expected winners than units: everyone wins everything
        assert_eq!(sortition(10, 20, 40, &output), 10);
    }

    #[test]
    fn seed_format_is_height_round_hash() {
        let seed = view_seed(4, 2, &BlockHash([0xab; 32]));
        let text = String::from_utf8(seed).unwrap();
        assert!(text.starts_with("4:2:abab"));
        assert_eq!(text.len(), "4:2:".len() + 64);
    }
}
