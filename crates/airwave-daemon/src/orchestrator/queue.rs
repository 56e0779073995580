use airwave_proto::protocol::Direction;
use airwave_proto::station::{Station, StationKey};

/// Ordered working set of stations plus the cursor of the active one.
/// The cursor is either unset or a valid index.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    stations: Vec<Station>,
    cursor: Option<usize>,
}

impl Queue {
    pub fn replace(&mut self, stations: Vec<Station>, cursor: Option<usize>) {
        self.cursor = cursor.filter(|c| *c < stations.len());
        self.stations = stations;
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn keys(&self) -> Vec<StationKey> {
        self.stations.iter().map(Station::key).collect()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn set_cursor(&mut self, index: usize) {
        if index < self.stations.len() {
            self.cursor = Some(index);
        }
    }

    pub fn current(&self) -> Option<&Station> {
        self.stations.get(self.cursor?)
    }

    pub fn position(&self, key: &StationKey) -> Option<usize> {
        self.stations.iter().position(|s| s.has_key(key))
    }

    /// Index one step away from the cursor, wrapping at both ends.  An unset
    /// cursor counts as 0.
    pub fn step(&self, direction: Direction) -> Option<usize> {
        let len = self.stations.len();
        if len == 0 {
            return None;
        }
        let current = self.cursor.unwrap_or(0);
        Some(match direction {
            Direction::Next => (current + 1) % len,
            Direction::Prev => (current + len - 1) % len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(key: &str) -> Station {
        serde_json::from_str(&format!(r#"{{"title":"{k}","city":"seoul","url":"{k}"}}"#, k = key))
            .unwrap()
    }

    fn queue(keys: &[&str], cursor: Option<usize>) -> Queue {
        let mut q = Queue::default();
        q.replace(keys.iter().map(|k| station(k)).collect(), cursor);
        q
    }

    #[test]
    fn step_wraps_both_ways() {
        let q = queue(&["/a", "/b", "/c"], Some(0));
        assert_eq!(q.step(Direction::Prev), Some(2));
        assert_eq!(q.step(Direction::Next), Some(1));

        let q = queue(&["/a", "/b", "/c"], Some(2));
        assert_eq!(q.step(Direction::Next), Some(0));
    }

    #[test]
    fn single_item_steps_onto_itself() {
        let q = queue(&["/a"], Some(0));
        assert_eq!(q.step(Direction::Next), Some(0));
        assert_eq!(q.step(Direction::Prev), Some(0));
    }

    #[test]
    fn empty_queue_has_no_step_and_no_cursor() {
        let q = queue(&[], Some(3));
        assert_eq!(q.cursor(), None);
        assert_eq!(q.step(Direction::Next), None);
    }

    #[test]
    fn cursor_out_of_range_is_rejected() {
        let mut q = queue(&["/a", "/b"], Some(5));
        assert_eq!(q.cursor(), None);
        q.set_cursor(1);
        assert_eq!(q.current().map(|s| s.title.as_str()), Some("/b"));
        q.set_cursor(2);
        assert_eq!(q.cursor(), Some(1));
        assert_eq!(q.position(&"/a".into()), Some(0));
    }
}
