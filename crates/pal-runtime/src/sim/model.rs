//! A rule-based stand-in for the language model.
//!
//! `ScriptedModel` reads the observation text a `SimWorld` produces and
//! answers with one short reasoning line plus one tool call, following the
//! pal priorities: attack a living neighbour when there is one, otherwise
//! wander, and now and then talk.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use pal_contracts::{
    message::{ConversationMessage, GeneratedMessage},
    model::{GenerationRequest, GenerationResponse, ModelError},
};
use pal_core::traits::LanguageModel;
use pal_tools::game::MAP_SIZE;

/// Chance of talking instead of attacking when a target is available.
const TALK_PROBABILITY: f64 = 0.15;

/// A living entity seen in an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sighting {
    token_id: u64,
    distance: f64,
}

#[derive(Default)]
pub struct ScriptedModel {
    calls: AtomicU64,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `generate` calls answered.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let observation = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ConversationMessage::User(text) => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or_default();

        Ok(GenerationResponse { messages: decide(observation), reasoning: None })
    }
}

fn decide(observation: &str) -> Vec<GeneratedMessage> {
    let mut rng = rand::thread_rng();
    let nearest = living_neighbours(observation)
        .into_iter()
        .min_by(|a, b| a.distance.total_cmp(&b.distance));

    match nearest {
        Some(target) if rng.gen_bool(TALK_PROBABILITY) => vec![
            GeneratedMessage::text(format!("#{} is close, time to talk.", target.token_id)),
            GeneratedMessage::tool_call(
                "talk",
                json!({ "toTokenId": target.token_id, "message": "Truce for now?" }),
            ),
        ],
        Some(target) => vec![
            GeneratedMessage::text(format!(
                "#{} is {:.1}m away. Attacking.",
                target.token_id, target.distance
            )),
            GeneratedMessage::tool_call("attack", json!({ "targetTokenId": target.token_id })),
        ],
        None => {
            let (x, y) = (rng.gen_range(0..=MAP_SIZE), rng.gen_range(0..=MAP_SIZE));
            vec![
                GeneratedMessage::text("Nobody around. Exploring."),
                GeneratedMessage::tool_call(
                    "move",
                    json!({ "x": x, "y": y, "message": "looking for a fight" }),
                ),
            ]
        }
    }
}

/// Other entities with health left, parsed from a world observation.
fn living_neighbours(observation: &str) -> Vec<Sighting> {
    let Some((_, others)) = observation.split_once("Other Tokens Info:") else {
        return Vec::new();
    };
    let others = others.split("All Events for tokenId").next().unwrap_or_default();

    others
        .split("\n\n")
        .filter_map(|block| {
            let block = block.trim();
            let token_id = block
                .strip_prefix("tokenId #")?
                .split_whitespace()
                .next()?
                .parse::<u64>()
                .ok()?;
            let health = field(block, "Health: ")?.parse::<u64>().ok()?;
            let distance = field(block, "Distance from tokenId #")?
                .rsplit("): ")
                .next()?
                .trim_end_matches('m')
                .parse::<f64>()
                .ok()?;
            (health > 0).then_some(Sighting { token_id, distance })
        })
        .collect()
}

/// Text after `label` up to the end of its line.
fn field<'a>(block: &'a str, label: &str) -> Option<&'a str> {
    let start = block.find(label)? + label.len();
    block[start..].lines().next().map(str::trim)
}
