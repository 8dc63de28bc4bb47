//! Outbound message queues: floating combat text for the HUD and the
//! narrative log. Both are drained by the presentation layer each frame;
//! the simulation only pushes.

use crate::geometry::FPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombatTextKind {
    GiveDamage,
    TakeDamage,
    Crit,
    Miss,
    Buff,
}

#[derive(Clone, Debug)]
pub struct CombatText {
    pub text: String,
    pub pos: FPoint,
    pub kind: CombatTextKind,
}

#[derive(Default)]
pub struct CombatTextQueue {
    entries: Vec<CombatText>,
}

impl CombatTextQueue {
    pub fn add_string(&mut self, text: &str, pos: FPoint, kind: CombatTextKind) {
        self.entries.push(CombatText {
            text: text.to_string(),
            pos,
            kind,
        });
    }

    pub fn add_int(&mut self, value: i32, pos: FPoint, kind: CombatTextKind) {
        self.add_string(&value.to_string(), pos, kind);
    }

    pub fn drain(&mut self) -> Vec<CombatText> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CombatText] {
        &self.entries
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogKind {
    Normal,
    /// Shown once and kept out of the repeating log history.
    Unique,
}

#[derive(Clone, Debug)]
pub struct LogMessage {
    pub text: String,
    pub kind: LogKind,
}

#[derive(Default)]
pub struct MessageQueue {
    entries: Vec<LogMessage>,
}

impl MessageQueue {
    pub fn log(&mut self, text: &str, kind: LogKind) {
        self.entries.push(LogMessage {
            text: text.to_string(),
            kind,
        });
    }

    pub fn drain(&mut self) -> Vec<LogMessage> {
        std::mem::take(&mut self.entries)
    }

    pub fn entries(&self) -> &[LogMessage] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_accumulate_and_drain() {
        let mut q = CombatTextQueue::default();
        q.add_int(12, FPoint::new(1.0, 1.0), CombatTextKind::TakeDamage);
        q.add_string("miss", FPoint::new(2.0, 2.0), CombatTextKind::Miss);
        assert_eq!(q.len(), 2);
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "12");
        assert!(q.is_empty());
    }
}
