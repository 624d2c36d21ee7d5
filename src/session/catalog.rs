//! Exercise catalogs.
//!
//! A [`Catalog`] is an ordered list of [`Level`]s, each an ordered list of
//! [`ExerciseItem`]s.  Articulation catalogs are built in; fluency and
//! language catalogs come from the backend (see [`crate::api::catalog`]).
//! Catalogs are read-only for the lifetime of a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ExerciseKind
// ---------------------------------------------------------------------------

/// Language therapy has two modes with separate catalogs and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageMode {
    /// Listen and pick the matching option.
    Receptive,
    /// Describe, answer or retell out loud.
    Expressive,
}

impl LanguageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageMode::Receptive => "receptive",
            LanguageMode::Expressive => "expressive",
        }
    }
}

impl fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "receptive" => Ok(LanguageMode::Receptive),
            "expressive" => Ok(LanguageMode::Expressive),
            other => Err(format!("unknown language mode '{other}' (receptive|expressive)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExerciseKind {
    Articulation { sound: String },
    Language { mode: LanguageMode },
    Fluency,
}

impl ExerciseKind {
    pub fn label(&self) -> String {
        match self {
            ExerciseKind::Articulation { sound } => format!("articulation /{sound}/"),
            ExerciseKind::Language { mode } => format!("{mode} language"),
            ExerciseKind::Fluency => "fluency".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExerciseItem
// ---------------------------------------------------------------------------

/// One answer of a multiple-choice item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub correct: bool,
}

/// One prompt the patient produces or responds to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExerciseItem {
    pub id: String,
    /// Type tag from the catalog (`sound`, `word`, `vocabulary`, `retell`, …).
    pub exercise_type: String,
    pub instruction: String,
    /// Text the patient should say, or the picture to find.
    pub target: String,
    /// Seconds; fluency items use it as the recording limit.
    pub expected_duration: Option<u32>,
    pub expected_keywords: Vec<String>,
    pub min_words: u32,
    /// Non-empty for receptive (multiple-choice) items.
    pub options: Vec<ChoiceOption>,
    /// Run the breathing warm-up before recording.
    pub breathing: bool,
    /// Story read aloud before a retell item.
    pub story: Option<String>,
}

impl ExerciseItem {
    pub fn is_multiple_choice(&self) -> bool {
        !self.options.is_empty()
    }

    /// Spoken cue for multiple-choice items.
    pub fn cue(&self) -> String {
        match self.exercise_type.as_str() {
            "vocabulary" => format!("Find the {}", self.target),
            "directions" => format!("Point to the {}", self.target),
            _ => self.target.clone(),
        }
    }

    pub fn option(&self, id: u32) -> Option<&ChoiceOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

// ---------------------------------------------------------------------------
// Level / Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    /// 1-based level number.
    pub number: u32,
    pub name: String,
    pub items: Vec<ExerciseItem>,
}

/// Ordered levels for one exercise kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub kind: ExerciseKind,
    levels: Vec<Level>,
}

/// Where the session goes after finishing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPosition {
    SameLevel { item_index: usize },
    NextLevel { level: u32 },
    Finished,
}

impl Catalog {
    /// Build a catalog; levels are sorted by number and empty levels dropped.
    pub fn new(kind: ExerciseKind, mut levels: Vec<Level>) -> Self {
        levels.retain(|l| !l.items.is_empty());
        levels.sort_by_key(|l| l.number);
        Self { kind, levels }
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn first_level(&self) -> Option<u32> {
        self.levels.first().map(|l| l.number)
    }

    pub fn last_level(&self) -> Option<u32> {
        self.levels.last().map(|l| l.number)
    }

    pub fn level(&self, number: u32) -> Option<&Level> {
        self.levels.iter().find(|l| l.number == number)
    }

    pub fn item(&self, level: u32, index: usize) -> Option<&ExerciseItem> {
        self.level(level).and_then(|l| l.items.get(index))
    }

    pub fn item_count(&self) -> usize {
        self.levels.iter().map(|l| l.items.len()).sum()
    }

    /// Position following `(level, index)`.
    pub fn next_position(&self, level: u32, index: usize) -> NextPosition {
        let Some(pos) = self.levels.iter().position(|l| l.number == level) else {
            return NextPosition::Finished;
        };
        if index + 1 < self.levels[pos].items.len() {
            return NextPosition::SameLevel {
                item_index: index + 1,
            };
        }
        match self.levels.get(pos + 1) {
            Some(next) => NextPosition::NextLevel { level: next.number },
            None => NextPosition::Finished,
        }
    }

    /// Index of `(level, index)` when all levels are laid end to end.
    pub fn flat_index(&self, level: u32, index: usize) -> Option<usize> {
        let mut offset = 0;
        for l in &self.levels {
            if l.number == level {
                return (index < l.items.len()).then_some(offset + index);
            }
            offset += l.items.len();
        }
        None
    }

    /// Inverse of [`flat_index`](Self::flat_index); `None` past the end.
    pub fn position_at(&self, flat: usize) -> Option<(u32, usize)> {
        let mut remaining = flat;
        for l in &self.levels {
            if remaining < l.items.len() {
                return Some((l.number, remaining));
            }
            remaining -= l.items.len();
        }
        None
    }

    // -----------------------------------------------------------------------
    // Built-in articulation catalog
    // -----------------------------------------------------------------------

    /// Sounds with a built-in articulation catalog.
    pub const ARTICULATION_SOUNDS: [&'static str; 5] = ["s", "r", "l", "k", "th"];

    /// Five levels of three targets for one sound.
    pub fn articulation(sound: &str) -> Option<Self> {
        let sound = sound.trim().to_ascii_lowercase();
        let table: [[&str; 3]; 5] = match sound.as_str() {
            "s" => [
                ["s", "sss", "hiss"],
                ["sa", "se", "si"],
                ["sun", "sock", "sip"],
                ["See the sun.", "Sit down.", "Pass the salt."],
                [
                    "Sam saw seven shiny shells.",
                    "The sun is very hot.",
                    "She sells sea shells.",
                ],
            ],
            "r" => [
                ["r", "rrr", "ra"],
                ["ra", "re", "ri"],
                ["rabbit", "red", "run"],
                ["Run to the road.", "Read the book.", "Red balloon."],
                [
                    "Rita rides the red rocket.",
                    "The rabbit raced around the yard.",
                    "Robert ran really fast.",
                ],
            ],
            "l" => [
                ["l", "la", "lal"],
                ["la", "le", "li"],
                ["lion", "leaf", "lamp"],
                ["Look at the lion.", "Lift the box.", "Light the lamp."],
                [
                    "Lily loves lemons.",
                    "The little lamb likes leaves.",
                    "Lay the blanket down.",
                ],
            ],
            "k" => [
                ["k", "ka", "ku"],
                ["ka", "ke", "ki"],
                ["kite", "cat", "car"],
                ["Kick the ball.", "Cook the rice.", "Clean the cup."],
                [
                    "Keep the kite flying high.",
                    "The cat climbed the kitchen counter.",
                    "Kara kept a key in her pocket.",
                ],
            ],
            "th" => [
                ["th", "thh", "th-hold"],
                ["tha", "the", "thi"],
                ["think", "this", "thumb"],
                ["Think about that.", "This is the thumb.", "They thank her."],
                [
                    "Those three thieves thought they were free.",
                    "This is my thumb.",
                    "The therapist taught them slowly.",
                ],
            ],
            _ => return None,
        };

        const LEVEL_NAMES: [&str; 5] = ["Sound", "Syllable", "Word", "Phrase", "Sentence"];

        let levels = table
            .iter()
            .zip(LEVEL_NAMES)
            .enumerate()
            .map(|(i, (targets, name))| Level {
                number: i as u32 + 1,
                name: name.to_string(),
                items: targets
                    .iter()
                    .enumerate()
                    .map(|(j, target)| ExerciseItem {
                        id: format!("{sound}-{}-{}", i + 1, j + 1),
                        exercise_type: name.to_ascii_lowercase(),
                        instruction: format!("Listen, then say: {target}"),
                        target: target.to_string(),
                        ..ExerciseItem::default()
                    })
                    .collect(),
            })
            .collect();

        Some(Self::new(ExerciseKind::Articulation { sound }, levels))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> ExerciseItem {
        ExerciseItem {
            id: id.into(),
            target: id.into(),
            ..ExerciseItem::default()
        }
    }

    fn two_level_catalog() -> Catalog {
        Catalog::new(
            ExerciseKind::Fluency,
            vec![
                Level {
                    number: 2,
                    name: "Phrases".into(),
                    items: vec![item("c")],
                },
                Level {
                    number: 1,
                    name: "Breathing".into(),
                    items: vec![item("a"), item("b")],
                },
                Level {
                    number: 3,
                    name: "Empty".into(),
                    items: vec![],
                },
            ],
        )
    }

    #[test]
    fn every_sound_has_five_levels_of_three() {
        for sound in Catalog::ARTICULATION_SOUNDS {
            let catalog = Catalog::articulation(sound).expect("catalog");
            assert_eq!(catalog.levels().len(), 5, "{sound}");
            assert!(catalog.levels().iter().all(|l| l.items.len() == 3));
            assert_eq!(catalog.level(4).map(|l| l.name.as_str()), Some("Phrase"));
        }
        assert_eq!(
            Catalog::articulation("r").and_then(|c| c.item(3, 0).cloned()).map(|i| i.target),
            Some("rabbit".into())
        );
        assert!(Catalog::articulation("zh").is_none());
    }

    #[test]
    fn levels_are_sorted_and_empty_ones_dropped() {
        let catalog = two_level_catalog();
        let numbers: Vec<u32> = catalog.levels().iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(catalog.last_level(), Some(2));
        assert_eq!(catalog.item_count(), 3);
    }

    #[test]
    fn next_position_walks_items_then_levels() {
        let catalog = two_level_catalog();
        assert_eq!(catalog.next_position(1, 0), NextPosition::SameLevel { item_index: 1 });
        assert_eq!(catalog.next_position(1, 1), NextPosition::NextLevel { level: 2 });
        assert_eq!(catalog.next_position(2, 0), NextPosition::Finished);
        assert_eq!(catalog.next_position(9, 0), NextPosition::Finished);
    }

    #[test]
    fn flat_index_round_trips() {
        let catalog = two_level_catalog();
        assert_eq!(catalog.flat_index(2, 0), Some(2));
        assert_eq!(catalog.position_at(2), Some((2, 0)));
        assert_eq!(catalog.position_at(1), Some((1, 1)));
        assert_eq!(catalog.position_at(3), None);
        assert_eq!(catalog.flat_index(1, 5), None);
    }

    #[test]
    fn receptive_cues() {
        let mut it = item("dog");
        it.exercise_type = "vocabulary".into();
        assert_eq!(it.cue(), "Find the dog");
        it.exercise_type = "directions".into();
        assert_eq!(it.cue(), "Point to the dog");
        it.exercise_type = "comprehension".into();
        assert_eq!(it.cue(), "dog");
    }

    #[test]
    fn language_mode_parses() {
        assert_eq!("Receptive".parse::<LanguageMode>(), Ok(LanguageMode::Receptive));
        assert!("visual".parse::<LanguageMode>().is_err());
    }
}
