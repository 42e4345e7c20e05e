use super::{Candidate, Strategy};
use meshwork_common::Context;
use rand::Rng;

/// Uniform random pick.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for RandomStrategy {
    fn select(&self, candidates: &[Candidate<'_>], _ctx: Option<&Context>) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..candidates.len()))
    }
}
