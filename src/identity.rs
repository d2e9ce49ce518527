//! Cross-frame identity matching against one enrolled face.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use crate::face::{FaceFeature, RawSpaceFeatures};

pub const DEFAULT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// What one `observe` call found.
#[derive(Clone, Debug, Default)]
pub struct MatchOutcome {
    /// Face enrolled by this call, if any.
    pub enrolled: Option<FaceFeature>,
    /// First face scoring above the threshold, with its score.
    pub matched: Option<(FaceFeature, f32)>,
    /// First face scoring at or below the threshold, with its score.
    pub distinct: Option<(FaceFeature, f32)>,
}

impl MatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.enrolled.is_none() && self.matched.is_none() && self.distinct.is_none()
    }
}

#[derive(Debug)]
pub struct IdentityMatcher {
    enrolled: Option<FaceFeature>,
    threshold: f32,
    interval: Duration,
    last_surfaced: Option<Instant>,
}

impl IdentityMatcher {
    pub fn new(threshold: f32, interval: Duration) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "match threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        Ok(Self {
            enrolled: None,
            threshold,
            interval,
            last_surfaced: None,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn enrolled(&self) -> Option<&FaceFeature> {
        self.enrolled.as_ref()
    }

    /// Forget the enrolled face; the next frame with faces enrolls again.
    pub fn reset(&mut self) {
        if self.enrolled.take().is_some() {
            log::info!("identity enrollment cleared");
        }
        self.last_surfaced = None;
    }

    /// Enroll the first face if nothing is enrolled, then (at most once per
    /// surfacing interval) compare the remaining faces against the enrolled
    /// one. A face enrolled by this call is not compared against itself.
    pub fn observe<F>(
        &mut self,
        faces: &RawSpaceFeatures,
        now: Instant,
        mut compare: F,
    ) -> Result<MatchOutcome>
    where
        F: FnMut(&FaceFeature, &FaceFeature) -> Result<f32>,
    {
        let mut outcome = MatchOutcome::default();
        let mut skip = None;
        if self.enrolled.is_none() {
            let Some(first) = faces.first() else {
                return Ok(outcome);
            };
            log::info!(
                "enrolled face {} (fingerprint {})",
                first.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                fingerprint(first)
            );
            self.enrolled = Some(first.clone());
            outcome.enrolled = Some(first.clone());
            skip = Some(0);
        }

        let due = self
            .last_surfaced
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            return Ok(outcome);
        }
        let Some(reference) = self.enrolled.as_ref() else {
            return Ok(outcome);
        };

        let mut compared = false;
        for (index, face) in faces.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }
            if outcome.matched.is_some() && outcome.distinct.is_some() {
                break;
            }
            let score = compare(reference, face)
                .with_context(|| format!("comparing face {} with enrolled face", index))?;
            compared = true;
            if score > self.threshold {
                if outcome.matched.is_none() {
                    outcome.matched = Some((face.clone(), score));
                }
            } else if outcome.distinct.is_none() {
                outcome.distinct = Some((face.clone(), score));
            }
        }
        if compared {
            self.last_surfaced = Some(now);
        }
        Ok(outcome)
    }
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self {
            enrolled: None,
            threshold: DEFAULT_THRESHOLD,
            interval: DEFAULT_INTERVAL,
            last_surfaced: None,
        }
    }
}

/// Short hex digest of a face embedding, for logs.
pub fn fingerprint(face: &FaceFeature) -> String {
    let mut hasher = Sha256::new();
    for value in &face.embedding {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}
