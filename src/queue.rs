//! The play queue: an ordered snapshot of the remote catalog.
//!
//! Every catalog snapshot replaces the queue wholesale. Local imports never
//! enter the queue.

use crate::track::TrackRecord;
use rand::Rng;
use serde::Deserialize;

/// How the queue advances when a track ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationMode {
    /// Catalog order, wrapping at the end.
    #[default]
    #[serde(alias = "all")]
    Sequential,
    /// Uniformly random pick from the whole queue.
    Shuffle,
    /// Replay the current track.
    #[serde(alias = "one")]
    RepeatOne,
}

impl NavigationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationMode::Sequential => "sequential",
            NavigationMode::Shuffle => "shuffle",
            NavigationMode::RepeatOne => "repeat-one",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: Vec<TrackRecord>,
    /// When set, shuffle never picks the current track (if it has a choice).
    shuffle_excludes_current: bool,
}

impl Queue {
    pub fn new(shuffle_excludes_current: bool) -> Self {
        Self {
            tracks: Vec::new(),
            shuffle_excludes_current,
        }
    }

    /// Replace the contents with a catalog snapshot, keeping its order.
    pub fn replace(&mut self, snapshot: Vec<TrackRecord>) {
        tracing::debug!("Queue replaced: {} -> {} tracks", self.tracks.len(), snapshot.len());
        self.tracks = snapshot;
    }

    pub fn tracks(&self) -> &[TrackRecord] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn first(&self) -> Option<&TrackRecord> {
        self.tracks.first()
    }

    pub fn get(&self, id: &str) -> Option<&TrackRecord> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackRecord> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    /// Id of the track to play after `current`, using the thread RNG for shuffle.
    pub fn advance(&self, current: &str, mode: NavigationMode) -> String {
        self.advance_with(current, mode, &mut rand::thread_rng())
    }

    /// Id of the track to play after `current`.
    ///
    /// An empty queue returns `current` unchanged. An id missing from the
    /// queue falls back to index 0 in sequential mode.
    pub fn advance_with<R: Rng + ?Sized>(&self, current: &str, mode: NavigationMode, rng: &mut R) -> String {
        if self.tracks.is_empty() {
            return current.to_string();
        }
        let len = self.tracks.len();
        let index = match mode {
            NavigationMode::RepeatOne => return current.to_string(),
            NavigationMode::Shuffle => {
                match self.position(current) {
                    Some(cur) if self.shuffle_excludes_current && len > 1 => {
                        // Draw from the other len - 1 slots.
                        let pick = rng.gen_range(0..len - 1);
                        if pick >= cur {
                            pick + 1
                        } else {
                            pick
                        }
                    }
                    _ => rng.gen_range(0..len),
                }
            }
            NavigationMode::Sequential => match self.position(current) {
                Some(cur) => (cur + 1) % len,
                None => 0,
            },
        };
        self.tracks[index].id.clone()
    }

    /// Id of the catalog-order predecessor of `current`, wrapping to the end.
    ///
    /// Navigation mode does not affect this. An id missing from the queue
    /// falls back to index 0.
    pub fn retreat(&self, current: &str) -> String {
        if self.tracks.is_empty() {
            return current.to_string();
        }
        let len = self.tracks.len();
        let index = match self.position(current) {
            Some(cur) => (cur + len - 1) % len,
            None => 0,
        };
        self.tracks[index].id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn queue_of(ids: &[&str]) -> Queue {
        let mut queue = Queue::new(false);
        queue.replace(
            ids.iter()
                .map(|id| TrackRecord::remote(*id, *id, format!("https://x/{id}.mp3")))
                .collect(),
        );
        queue
    }

    #[test]
    fn sequential_wraps_around() {
        let queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.advance("a", NavigationMode::Sequential), "b");
        assert_eq!(queue.advance("c", NavigationMode::Sequential), "a");
    }

    #[test]
    fn advancing_len_times_returns_to_start() {
        let queue = queue_of(&["a", "b", "c", "d", "e"]);
        for start in ["a", "c", "e"] {
            let mut id = start.to_string();
            for _ in 0..queue.len() {
                id = queue.advance(&id, NavigationMode::Sequential);
            }
            assert_eq!(id, start);
        }
    }

    #[test]
    fn unknown_id_falls_back_to_first() {
        let queue = queue_of(&["a", "b"]);
        assert_eq!(queue.advance("gone", NavigationMode::Sequential), "a");
        assert_eq!(queue.retreat("gone"), "a");
    }

    #[test]
    fn empty_queue_is_a_noop() {
        let queue = Queue::default();
        for mode in [NavigationMode::Sequential, NavigationMode::Shuffle, NavigationMode::RepeatOne] {
            assert_eq!(queue.advance("x", mode), "x");
        }
        assert_eq!(queue.retreat("x"), "x");
    }

    #[test]
    fn repeat_one_returns_current() {
        let queue = queue_of(&["a", "b"]);
        assert_eq!(queue.advance("b", NavigationMode::RepeatOne), "b");
    }

    #[test]
    fn retreat_wraps_to_last() {
        let queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.retreat("a"), "c");
        assert_eq!(queue.retreat("c"), "b");
    }

    #[test]
    fn shuffle_picks_from_queue_and_may_repeat_current() {
        let queue = queue_of(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut saw_current = false;
        for _ in 0..200 {
            let next = queue.advance_with("a", NavigationMode::Shuffle, &mut rng);
            assert!(queue.get(&next).is_some());
            saw_current |= next == "a";
        }
        assert!(saw_current);
    }

    #[test]
    fn shuffle_can_exclude_current() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.shuffle_excludes_current = true;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert_ne!(queue.advance_with("b", NavigationMode::Shuffle, &mut rng), "b");
        }

        // A single-track queue has no alternative.
        let mut single = queue_of(&["only"]);
        single.shuffle_excludes_current = true;
        assert_eq!(single.advance_with("only", NavigationMode::Shuffle, &mut rng), "only");
    }

    #[test]
    fn mode_accepts_legacy_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: NavigationMode,
        }
        let all: Wrapper = serde_json::from_str(r#"{"mode":"all"}"#).unwrap();
        let one: Wrapper = serde_json::from_str(r#"{"mode":"one"}"#).unwrap();
        let repeat: Wrapper = serde_json::from_str(r#"{"mode":"repeat-one"}"#).unwrap();
        assert_eq!(all.mode, NavigationMode::Sequential);
        assert_eq!(one.mode, NavigationMode::RepeatOne);
        assert_eq!(repeat.mode, NavigationMode::RepeatOne);
    }
}
