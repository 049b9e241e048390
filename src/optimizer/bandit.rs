//! Arm-selection rules for bandit-style optimizers.

use rand::Rng;
use rand_distr::{Beta, Distribution};

/// UCB1: `mean + exploration·√(ln(total)/count)`. Arms that have never
/// been pulled take priority over every counted arm.
pub fn select_ucb1(counts: &[u64], means: &[f64], exploration: f64) -> usize {
    debug_assert_eq!(counts.len(), means.len());
    if let Some(uncounted) = counts.iter().position(|&count| count == 0) {
        return uncounted;
    }
    let total: u64 = counts.iter().sum();
    let ln_total = (total.max(1) as f64).ln();

    let mut best = 0;
    let mut best_value = f64::MIN;
    for (arm, (&count, &mean)) in counts.iter().zip(means).enumerate() {
        let value = mean + exploration * (ln_total / count as f64).sqrt();
        if value > best_value {
            best_value = value;
            best = arm;
        }
    }
    best
}

/// Thompson sampling over Beta posteriors: one draw from
/// `Beta(successes+1, failures+1)` per arm, highest draw wins.
pub fn select_thompson<R: Rng>(successes: &[f64], failures: &[f64], rng: &mut R) -> usize {
    debug_assert_eq!(successes.len(), failures.len());
    let mut best = 0;
    let mut best_draw = f64::MIN;
    for arm in 0..successes.len() {
        let alpha = successes[arm].max(0.0) + 1.0;
        let beta = failures[arm].max(0.0) + 1.0;
        let draw = Beta::new(alpha, beta)
            .map(|dist| dist.sample(rng))
            .unwrap_or(0.0);
        if draw > best_draw {
            best_draw = draw;
            best = arm;
        }
    }
    best
}

/// ε-greedy: explore a uniform random arm with probability `epsilon`,
/// otherwise exploit the best mean.
pub fn select_epsilon_greedy<R: Rng>(means: &[f64], epsilon: f64, rng: &mut R) -> usize {
    if means.is_empty() {
        return 0;
    }
    if rng.r#gen::<f64>() < epsilon.clamp(0.0, 1.0) {
        return rng.gen_range(0..means.len());
    }
    argmax(means)
}

/// Decaying exploration rate for adaptive ε-greedy: `ε/(1 + 0.1·t)`.
pub fn adaptive_epsilon(epsilon: f64, step: usize) -> f64 {
    epsilon / (1.0 + 0.1 * step as f64)
}

/// Softmax selection at the given temperature.
pub fn select_softmax<R: Rng>(means: &[f64], temperature: f64, rng: &mut R) -> usize {
    if means.is_empty() {
        return 0;
    }
    let temperature = temperature.max(1e-6);
    let max = means.iter().cloned().fold(f64::MIN, f64::max);
    let weights: Vec<f64> = means
        .iter()
        .map(|mean| ((mean - max) / temperature).exp())
        .collect();
    let total: f64 = weights.iter().sum();

    let mut pick = rng.r#gen::<f64>() * total;
    for (arm, weight) in weights.iter().enumerate() {
        pick -= weight;
        if pick <= 0.0 {
            return arm;
        }
    }
    weights.len() - 1
}

/// Shifts rewards to mean 0, standard deviation 1. A constant (or empty)
/// slice maps to all zeros.
pub fn normalize_rewards(rewards: &[f64]) -> Vec<f64> {
    if rewards.is_empty() {
        return Vec::new();
    }
    let mean = rewards.iter().sum::<f64>() / rewards.len() as f64;
    let variance = rewards
        .iter()
        .map(|reward| (reward - mean) * (reward - mean))
        .sum::<f64>()
        / rewards.len() as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return vec![0.0; rewards.len()];
    }
    rewards.iter().map(|reward| (reward - mean) / std).collect()
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn ucb_explores_uncounted_arms_first() {
        assert_eq!(select_ucb1(&[5, 0, 3], &[0.5, 0.0, 0.4], 2.0), 1);
    }

    #[test]
    fn ucb_exploits_once_all_counted() {
        // Equal counts: the higher mean wins.
        assert_eq!(select_ucb1(&[10, 10], &[0.2, 0.8], 2.0), 1);
        // A rarely-pulled arm can beat a slightly better mean.
        let arm = select_ucb1(&[100, 2], &[0.55, 0.5], 2.0);
        assert_eq!(arm, 1);
    }

    #[test]
    fn epsilon_zero_is_pure_exploitation() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            assert_eq!(select_epsilon_greedy(&[0.1, 0.9, 0.3], 0.0, &mut rng), 1);
        }
    }

    #[test]
    fn epsilon_one_explores() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = [false; 3];
        for _ in 0..100 {
            seen[select_epsilon_greedy(&[0.1, 0.9, 0.3], 1.0, &mut rng)] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn adaptive_epsilon_decays() {
        assert_eq!(adaptive_epsilon(0.5, 0), 0.5);
        assert!(adaptive_epsilon(0.5, 10) < 0.3);
        assert!(adaptive_epsilon(0.5, 100) < 0.05);
    }

    #[test]
    fn thompson_prefers_the_clearly_better_arm() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut wins = [0u32; 2];
        for _ in 0..200 {
            wins[select_thompson(&[50.0, 2.0], &[2.0, 50.0], &mut rng)] += 1;
        }
        assert!(wins[0] > wins[1]);
    }

    #[test]
    fn softmax_is_weighted_toward_high_means() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut picks = [0u32; 2];
        for _ in 0..500 {
            picks[select_softmax(&[0.0, 1.0], 0.2, &mut rng)] += 1;
        }
        assert!(picks[1] > picks[0] * 3);
    }

    #[test]
    fn reward_normalization() {
        let normalized = normalize_rewards(&[1.0, 2.0, 3.0]);
        assert!((normalized.iter().sum::<f64>()).abs() < 1e-9);
        assert!((normalized[2] - 1.224_744_871_391_589).abs() < 1e-9);

        assert_eq!(normalize_rewards(&[2.0, 2.0]), vec![0.0, 0.0]);
        assert!(normalize_rewards(&[]).is_empty());
    }
}
