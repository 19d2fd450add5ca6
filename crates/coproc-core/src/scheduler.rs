//! Prioritized round-robin team scheduler.
//!
//! Teams are grouped by priority. `schedule()` emits ready teams group by
//! group, highest priority first. Inside a group, members are visited in
//! registration order starting at a rotating offset; the offset advances
//! once per call whenever the group has at least two ready members, so a
//! fully ready group of size k returns to its original order after k calls.
//!
//! The offset advances modulo the *full* group size: sleeping members are
//! skipped in the output but keep their rotation slot.
//!
//! `schedule()` only produces an order. Running teams is the host's job.

use std::collections::HashMap;

use coproc_types::error::SchedulerError;
use coproc_types::scheduler::{SchedulerEntry, TeamState};

#[derive(Debug, Clone)]
struct TeamSlot {
    priority: i32,
    state: TeamState,
    /// Registration sequence number; fixes the order inside a group.
    seq: u64,
}

/// Prioritized round-robin scheduler.
#[derive(Debug, Default)]
pub struct Scheduler {
    teams: HashMap<String, TeamSlot>,
    /// Round-robin offset per priority group.
    offsets: HashMap<i32, usize>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a team in the `Ready` state.
    pub fn add(&mut self, name: impl Into<String>, priority: i32) -> Result<(), SchedulerError> {
        let name = name.into();
        if self.teams.contains_key(&name) {
            return Err(SchedulerError::DuplicateTeam(name));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(team = %name, priority, "team added to scheduler");
        self.teams.insert(
            name,
            TeamSlot {
                priority,
                state: TeamState::Ready,
                seq,
            },
        );
        Ok(())
    }

    /// Deregister a team, returning its final entry (state `Removed`).
    ///
    /// The group's stored offset is clamped into the shrunk group.
    pub fn remove(&mut self, name: &str) -> Result<SchedulerEntry, SchedulerError> {
        let slot = self
            .teams
            .remove(name)
            .ok_or_else(|| SchedulerError::UnknownTeam(name.to_string()))?;

        let remaining = self.group(slot.priority).len();
        if remaining == 0 {
            self.offsets.remove(&slot.priority);
        } else if let Some(offset) = self.offsets.get_mut(&slot.priority) {
            *offset = (*offset).min(remaining - 1);
        }

        tracing::debug!(team = name, "team removed from scheduler");
        Ok(SchedulerEntry {
            name: name.to_string(),
            priority: slot.priority,
            state: TeamState::Removed,
        })
    }

    /// Put a team to sleep. No-op if it is already sleeping.
    pub fn sleep(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        if slot.state != TeamState::Sleeping {
            slot.state = TeamState::Sleeping;
            tracing::debug!(team = name, "team sleeping");
        }
        Ok(())
    }

    /// Wake a sleeping team. No-op if it is not sleeping.
    pub fn wake(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        if slot.state == TeamState::Sleeping {
            slot.state = TeamState::Ready;
            tracing::debug!(team = name, "team woken");
        }
        Ok(())
    }

    /// Mark a ready team as holding the current turn.
    ///
    /// Running teams are not emitted by `schedule()` until they yield.
    /// Sleeping teams stay asleep.
    pub fn set_running(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        if slot.state == TeamState::Ready {
            slot.state = TeamState::Running;
        }
        Ok(())
    }

    /// Give up the turn: a running team becomes ready again, and the
    /// group's rotation is moved so this team comes last in the next
    /// `schedule()`. No rotation change for a team alone in its group.
    pub fn yield_turn(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        if slot.state == TeamState::Running {
            slot.state = TeamState::Ready;
        }
        let priority = slot.priority;

        let group = self.group(priority);
        if group.len() < 2 {
            return Ok(());
        }
        if let Some(index) = group.iter().position(|member| member == name) {
            self.offsets.insert(priority, (index + 1) % group.len());
        }
        Ok(())
    }

    /// End a turn handed out by `schedule()`: a running team becomes ready
    /// again and the group's rotation is left as `schedule()` advanced it.
    pub fn finish_turn(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        if slot.state == TeamState::Running {
            slot.state = TeamState::Ready;
        }
        Ok(())
    }

    /// Ready team names, highest priority first, rotating within each group.
    pub fn schedule(&mut self) -> Vec<String> {
        let mut priorities: Vec<i32> = self.teams.values().map(|slot| slot.priority).collect();
        priorities.sort_unstable_by(|a, b| b.cmp(a));
        priorities.dedup();

        let mut order = Vec::new();
        for priority in priorities {
            let group = self.group(priority);
            let size = group.len();
            let offset = self.offsets.get(&priority).copied().unwrap_or(0) % size;

            let mut ready = 0usize;
            for i in 0..size {
                let name = &group[(offset + i) % size];
                if self.teams[name].state == TeamState::Ready {
                    order.push(name.clone());
                    ready += 1;
                }
            }

            if ready >= 2 {
                self.offsets.insert(priority, (offset + 1) % size);
            }
        }
        order
    }

    /// Current state of a team, or `None` if it is not registered.
    pub fn state(&self, name: &str) -> Option<TeamState> {
        self.teams.get(name).map(|slot| slot.state)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.teams.contains_key(name)
    }

    /// All registered teams, highest priority first, then registration order.
    pub fn entries(&self) -> Vec<SchedulerEntry> {
        let mut slots: Vec<(&String, &TeamSlot)> = self.teams.iter().collect();
        slots.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        slots
            .into_iter()
            .map(|(name, slot)| SchedulerEntry {
                name: name.clone(),
                priority: slot.priority,
                state: slot.state,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut TeamSlot, SchedulerError> {
        self.teams
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownTeam(name.to_string()))
    }

    /// Members of a priority group in registration order.
    fn group(&self, priority: i32) -> Vec<String> {
        let mut members: Vec<(&String, u64)> = self
            .teams
            .iter()
            .filter(|(_, slot)| slot.priority == priority)
            .map(|(name, slot)| (name, slot.seq))
            .collect();
        members.sort_by_key(|(_, seq)| *seq);
        members.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with(teams: &[(&str, i32)]) -> Scheduler {
        let mut scheduler = Scheduler::new();
        for (name, priority) in teams {
            scheduler.add(*name, *priority).unwrap();
        }
        scheduler
    }

    #[test]
    fn schedule_orders_by_descending_priority() {
        let mut s = scheduler_with(&[("low", 1), ("high", 10), ("mid", 5)]);
        assert_eq!(s.schedule(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn full_group_returns_to_original_order_after_k_calls() {
        let mut s = scheduler_with(&[("a", 5), ("b", 5), ("c", 5), ("boss", 9)]);
        let first = s.schedule();
        assert_eq!(first, vec!["boss", "a", "b", "c"]);
        assert_eq!(s.schedule(), vec!["boss", "b", "c", "a"]);
        assert_eq!(s.schedule(), vec!["boss", "c", "a", "b"]);
        assert_eq!(s.schedule(), first);
    }

    #[test]
    fn sleeping_member_keeps_its_rotation_slot() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1), ("c", 1)]);
        s.sleep("b").unwrap();
        assert_eq!(s.schedule(), vec!["a", "c"]);
        // offset now points at the sleeping member's slot
        assert_eq!(s.schedule(), vec!["c", "a"]);
        assert_eq!(s.state("b"), Some(TeamState::Sleeping));
    }

    #[test]
    fn single_ready_member_does_not_advance_rotation() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1)]);
        s.sleep("b").unwrap();
        assert_eq!(s.schedule(), vec!["a"]);
        assert_eq!(s.schedule(), vec!["a"]);
        s.wake("b").unwrap();
        assert_eq!(s.schedule(), vec!["a", "b"]);
    }

    #[test]
    fn sleep_and_wake_are_idempotent() {
        let mut s = scheduler_with(&[("a", 1)]);
        s.sleep("a").unwrap();
        s.sleep("a").unwrap();
        assert_eq!(s.state("a"), Some(TeamState::Sleeping));
        s.wake("a").unwrap();
        s.wake("a").unwrap();
        assert_eq!(s.state("a"), Some(TeamState::Ready));
    }

    #[test]
    fn unknown_team_operations_fail() {
        let mut s = Scheduler::new();
        assert_eq!(
            s.sleep("ghost"),
            Err(SchedulerError::UnknownTeam("ghost".to_string()))
        );
        assert!(s.wake("ghost").is_err());
        assert!(s.yield_turn("ghost").is_err());
        assert!(s.remove("ghost").is_err());
        assert!(s.set_running("ghost").is_err());
        assert!(s.finish_turn("ghost").is_err());
    }

    #[test]
    fn duplicate_add_fails() {
        let mut s = scheduler_with(&[("a", 1)]);
        assert_eq!(
            s.add("a", 3),
            Err(SchedulerError::DuplicateTeam("a".to_string()))
        );
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn yield_sends_team_to_back_of_group() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1), ("c", 1)]);
        s.yield_turn("a").unwrap();
        assert_eq!(s.schedule(), vec!["b", "c", "a"]);

        let mut s = scheduler_with(&[("a", 1), ("b", 1), ("c", 1)]);
        s.yield_turn("b").unwrap();
        assert_eq!(s.schedule(), vec!["c", "a", "b"]);
    }

    #[test]
    fn yield_on_solo_group_is_noop() {
        let mut s = scheduler_with(&[("solo", 3), ("x", 1), ("y", 1)]);
        s.yield_turn("solo").unwrap();
        assert_eq!(s.schedule(), vec!["solo", "x", "y"]);
    }

    #[test]
    fn running_team_is_not_scheduled_until_it_yields() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1)]);
        s.set_running("a").unwrap();
        assert_eq!(s.state("a"), Some(TeamState::Running));
        assert_eq!(s.schedule(), vec!["b"]);
        s.yield_turn("a").unwrap();
        assert_eq!(s.state("a"), Some(TeamState::Ready));
        assert_eq!(s.schedule(), vec!["b", "a"]);
    }

    #[test]
    fn finishing_every_turn_keeps_the_rotation_moving() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1), ("c", 1)]);
        let mut orders = Vec::new();
        for _ in 0..3 {
            let order = s.schedule();
            for team in &order {
                s.set_running(team).unwrap();
            }
            for team in &order {
                s.finish_turn(team).unwrap();
            }
            orders.push(order);
        }
        assert_eq!(
            orders,
            vec![vec!["a", "b", "c"], vec!["b", "c", "a"], vec!["c", "a", "b"]]
        );
        assert_eq!(s.state("a"), Some(TeamState::Ready));
    }

    #[test]
    fn remove_clamps_offset_into_shrunk_group() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1), ("c", 1)]);
        s.schedule();
        s.schedule();
        // offset is now 2 (pointing at "c")
        let removed = s.remove("c").unwrap();
        assert_eq!(removed.state, TeamState::Removed);
        assert_eq!(s.schedule(), vec!["b", "a"]);
        assert_eq!(s.state("c"), None);
    }

    #[test]
    fn remove_last_member_drops_group() {
        let mut s = scheduler_with(&[("a", 1), ("b", 1)]);
        s.schedule();
        s.remove("a").unwrap();
        s.remove("b").unwrap();
        assert!(s.is_empty());
        assert!(s.schedule().is_empty());
        s.add("c", 1).unwrap();
        s.add("d", 1).unwrap();
        assert_eq!(s.schedule(), vec!["c", "d"]);
    }

    #[test]
    fn entries_are_listed_by_priority_then_registration() {
        let mut s = scheduler_with(&[("b", 1), ("a", 1), ("top", 7)]);
        s.sleep("a").unwrap();
        let entries = s.entries();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["top", "b", "a"]);
        assert_eq!(entries[2].state, TeamState::Sleeping);
    }
}
