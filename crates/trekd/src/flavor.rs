//! Message enhancement policies.
//!
//! An [`Enhancer`] may rewrite the text of an outgoing message before it
//! is dispatched. Bots always use the scripted table; human messages go
//! through [`Chance`] so only a configurable share of them is rewritten.

use std::collections::HashMap;

use rand::Rng;

use trek_core::{ChatMessage, ParticipantName};

/// Policy that may rewrite a message's text.
pub trait Enhancer: Send + Sync {
    /// Rewrites `message` in place and returns true if it did.
    ///
    /// `index` rotates through the sender's scripted lines; callers bump
    /// it after every successful enhancement.
    fn enhance(&self, sender: &ParticipantName, message: &mut ChatMessage, index: usize) -> bool;
}

/// Never rewrites anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFlavor;

impl Enhancer for NoFlavor {
    fn enhance(&self, _sender: &ParticipantName, _message: &mut ChatMessage, _index: usize) -> bool {
        false
    }
}

/// Replaces the text with a scripted line keyed by the sender's name.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFlavor {
    lines: HashMap<String, Vec<String>>,
}

impl ScriptedFlavor {
    pub fn new(lines: HashMap<String, Vec<String>>) -> Self {
        Self { lines }
    }

    /// The built-in bridge crew table.
    pub fn star_trek() -> Self {
        let lines = CREW_LINES
            .iter()
            .map(|(name, lines)| {
                (
                    (*name).to_string(),
                    lines.iter().map(|l| (*l).to_string()).collect(),
                )
            })
            .collect();
        Self { lines }
    }

    /// Returns the scripted line for `sender` at `index`, wrapping around.
    pub fn line_for(&self, sender: &ParticipantName, index: usize) -> Option<&str> {
        let lines = self.lines.get(sender.as_str())?;
        if lines.is_empty() {
            return None;
        }
        lines.get(index % lines.len()).map(String::as_str)
    }
}

impl Enhancer for ScriptedFlavor {
    fn enhance(&self, sender: &ParticipantName, message: &mut ChatMessage, index: usize) -> bool {
        match self.line_for(sender, index) {
            Some(line) => {
                message.message = line.to_string();
                true
            }
            None => false,
        }
    }
}

/// Applies the inner policy with the given probability.
#[derive(Debug, Clone)]
pub struct Chance<E> {
    inner: E,
    probability: f64,
}

impl<E> Chance<E> {
    /// Probability is clamped to `0.0..=1.0`.
    pub fn new(inner: E, probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { inner, probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl<E: Enhancer> Enhancer for Chance<E> {
    fn enhance(&self, sender: &ParticipantName, message: &mut ChatMessage, index: usize) -> bool {
        if !rand::thread_rng().gen_bool(self.probability) {
            return false;
        }
        self.inner.enhance(sender, message, index)
    }
}

const CREW_LINES: &[(&str, &[&str])] = &[
    (
        "picard",
        &[
            "Tea. Earl Grey. Hot.",
            "Broccoli, is that report ready yet?",
            "Make it so.",
        ],
    ),
    (
        "worf",
        &[
            "Captain, I recommend we fire all photon torpedoes.",
            "AFK waxing my bat'leth",
        ],
    ),
    (
        "data",
        &[
            "Anyone for a game of Strategema?",
            "Can anyone watch Spot this weekend?",
        ],
    ),
    ("barclay", &["I'll be on the holodeck. I'm not to be disturbed."]),
    ("troi", &["I'm sensing a strong emotional presence in this chat room."]),
    ("lwaxana", &["Captain, you should be ashamed for thinking that."]),
    (
        "q",
        &[
            "What is the point to all this?",
            "I must introduce these emojis to the continuum :P",
        ],
    ),
    ("crusher", &["Has anyone seen my cortical stimulator?"]),
    ("wesley", &["I think the ship is in grave danger!"]),
    ("obrien", &["Another transporter malfunction. Of course."]),
    (
        "laforge",
        &["Captain, I recommend we flood Cargo Bay 2 with verteron particles."],
    ),
    ("riker", &["Data, will you answer that phone?!"]),
    ("borg", &["Resistance is not futile! lol jk"]),
];
