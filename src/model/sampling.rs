//! Next-token selection: greedy, or temperature + top-k + nucleus (top-p)
//! sampling, applied in that order.

use std::cmp::Ordering;

use rand::{
    SeedableRng,
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
};

use crate::model::GenerationParams;

pub struct Sampler {
    temperature: f64,
    top_p: f64,
    top_k: usize,
    do_sample: bool,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: &GenerationParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            do_sample: params.do_sample,
            rng,
        }
    }

    pub fn is_greedy(&self) -> bool {
        !self.do_sample || self.temperature <= 0.0
    }

    /// Picks the next token id from last-position logits.
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        if self.is_greedy() {
            return argmax(logits);
        }

        let mut scaled: Vec<f64> = logits
            .iter()
            .map(|&v| f64::from(v) / self.temperature)
            .collect();
        top_k_filter(&mut scaled, self.top_k);
        let probs = nucleus(&softmax(&scaled), self.top_p);

        match WeightedIndex::new(&probs) {
            Ok(dist) => dist.sample(&mut self.rng) as u32,
            Err(_) => argmax(logits),
        }
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx as u32)
        .unwrap_or(0)
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut probs: Vec<f64> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = probs.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    }
    probs
}

/// Masks every logit below the k-th largest. `0` disables the filter.
fn top_k_filter(logits: &mut [f64], top_k: usize) {
    if top_k == 0 || top_k >= logits.len() {
        return;
    }
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_unstable_by(|&a, &b| logits[b].total_cmp(&logits[a]));
    for &idx in &order[top_k..] {
        logits[idx] = f64::NEG_INFINITY;
    }
}

/// Zeroes everything outside the smallest top set whose mass reaches `top_p`.
/// The most likely token always survives.
fn nucleus(probs: &[f64], top_p: f64) -> Vec<f64> {
    if top_p >= 1.0 {
        return probs.to_vec();
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut kept = vec![0.0; probs.len()];
    let mut mass = 0.0;
    for idx in order {
        kept[idx] = probs[idx];
        mass += probs[idx];
        if mass >= top_p {
            break;
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(do_sample: bool, temperature: f64, top_p: f64) -> GenerationParams {
        GenerationParams {
            do_sample,
            temperature,
            top_p,
            top_k: 0,
            seed: Some(7),
            ..GenerationParams::default()
        }
    }

    #[test]
    fn greedy_when_sampling_disabled() {
        let mut sampler = Sampler::new(&params(false, 0.7, 0.9));
        assert!(sampler.is_greedy());
        for _ in 0..10 {
            assert_eq!(sampler.sample(&[0.1, 2.5, 0.3, 1.9]), 1);
        }
    }

    #[test]
    fn zero_temperature_is_greedy() {
        let mut sampler = Sampler::new(&params(true, 0.0, 0.9));
        assert_eq!(sampler.sample(&[3.0, -1.0, 0.0]), 0);
    }

    #[test]
    fn nucleus_excludes_the_tail() {
        // softmax ~ [0.64, 0.24, 0.09, 0.03]; top_p 0.8 keeps tokens 0 and 1
        let logits = [3.0, 2.0, 1.0, 0.0];
        let mut sampler = Sampler::new(&params(true, 1.0, 0.8));
        for _ in 0..200 {
            let token = sampler.sample(&logits);
            assert!(token == 0 || token == 1, "sampled tail token {token}");
        }
    }

    #[test]
    fn top_k_excludes_lower_ranked_tokens() {
        // Flat distribution: only the top-k cut can exclude anything.
        let logits = [1.0, 5.0, 1.0, 4.9, 1.0, 4.8];
        let mut sampler = Sampler::new(&GenerationParams {
            top_k: 2,
            ..params(true, 100.0, 1.0)
        });
        let mut seen = [false; 6];
        for _ in 0..300 {
            let token = sampler.sample(&logits) as usize;
            assert!(token == 1 || token == 3, "sampled token {token} outside top-k");
            seen[token] = true;
        }
        assert!(seen[1] && seen[3]);
    }

    #[test]
    fn top_k_filter_keeps_exactly_k_logits() {
        let mut logits = vec![0.3, 2.0, -1.0, 1.5];
        top_k_filter(&mut logits, 2);
        assert_eq!(logits, vec![f64::NEG_INFINITY, 2.0, f64::NEG_INFINITY, 1.5]);

        let mut untouched = vec![0.3, 2.0];
        top_k_filter(&mut untouched, 0);
        assert_eq!(untouched, vec![0.3, 2.0]);
    }

    #[test]
    fn nucleus_always_keeps_the_top_token() {
        let kept = nucleus(&[0.5, 0.3, 0.2], 0.1);
        assert_eq!(kept, vec![0.5, 0.0, 0.0]);
    }

    #[test]
    fn sampling_visits_more_than_one_token() {
        let logits = [1.0; 4];
        let mut sampler = Sampler::new(&params(true, 1.0, 1.0));
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[sampler.sample(&logits) as usize] = true;
        }
        assert!(seen.iter().filter(|&&s| s).count() > 1);
    }

    #[test]
    fn same_seed_same_tokens() {
        let logits = [0.2, 0.4, 0.1, 0.3, 0.25];
        let mut a = Sampler::new(&params(true, 0.7, 0.9));
        let mut b = Sampler::new(&params(true, 0.7, 0.9));
        let left: Vec<u32> = (0..32).map(|_| a.sample(&logits)).collect();
        let right: Vec<u32> = (0..32).map(|_| b.sample(&logits)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn non_finite_logits_fall_back_to_argmax() {
        let mut sampler = Sampler::new(&params(true, 0.7, 0.9));
        assert_eq!(sampler.sample(&[f32::NAN, 4.0, f32::NAN]), 1);
    }
}
