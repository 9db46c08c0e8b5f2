use rand::Rng;

use crate::models::DAY_MS;

/// Minimum time between two credited spins of one user.
pub const SPIN_COOLDOWN_MS: i64 = DAY_MS;

/// Whole turns the wheel makes before settling on the drawn slot.
const FULL_TURNS: u32 = 5;

/// Picks the winning slot. Injected so tests can fix the outcome.
pub trait RewardDraw: Send + Sync + 'static {
    /// Uniform index in `0..slots`; `slots` is never zero.
    fn draw_index(&self, slots: usize) -> usize;
}

pub struct RandomDraw;

impl RewardDraw for RandomDraw {
    fn draw_index(&self, slots: usize) -> usize {
        rand::thread_rng().gen_range(0..slots)
    }
}

/// Always lands on the same slot.
pub struct FixedDraw(pub usize);

impl RewardDraw for FixedDraw {
    fn draw_index(&self, slots: usize) -> usize {
        self.0 % slots
    }
}

/// Milliseconds left before the next spin, or `None` when one is allowed.
pub fn cooldown_remaining(last_spin: Option<i64>, now: i64) -> Option<i64> {
    let last = last_spin?;
    let elapsed = now - last;
    if elapsed >= SPIN_COOLDOWN_MS {
        None
    } else {
        Some(SPIN_COOLDOWN_MS - elapsed)
    }
}

pub fn reward_at(rewards: &[f64], index: usize, max_reward: f64) -> Option<f64> {
    rewards.get(index).map(|r| r.min(max_reward).max(0.0))
}

/// Rotation in degrees that brings the middle of slot `index` under a
/// pointer at the top of the wheel, after a few full turns. Slots are laid
/// out clockwise starting at the pointer.
pub fn target_angle(index: usize, slots: usize) -> f64 {
    let slot = 360.0 / slots.max(1) as f64;
    let center = index as f64 * slot + slot / 2.0;
    FULL_TURNS as f64 * 360.0 + (360.0 - center)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown() {
        assert_eq!(cooldown_remaining(None, 0), None);
        assert_eq!(cooldown_remaining(Some(0), SPIN_COOLDOWN_MS), None);
        assert_eq!(cooldown_remaining(Some(0), SPIN_COOLDOWN_MS - 1), Some(1));
        assert_eq!(cooldown_remaining(Some(1_000), 1_000), Some(SPIN_COOLDOWN_MS));
    }

    #[test]
    fn test_reward_is_clamped() {
        let table = [1.0, 2.0, 5.0, 10.0, 15.0, 20.0];
        assert_eq!(reward_at(&table, 2, 10.0), Some(5.0));
        assert_eq!(reward_at(&table, 5, 10.0), Some(10.0));
        assert_eq!(reward_at(&table, 6, 10.0), None);
    }

    #[test]
    fn test_target_angle_points_at_slot_center() {
        assert_eq!(target_angle(0, 12), 5.0 * 360.0 + 345.0);
        assert_eq!(target_angle(11, 12), 5.0 * 360.0 + 15.0);
        let a = target_angle(3, 12);
        assert!(a > 5.0 * 360.0 && a < 6.0 * 360.0);
    }

    #[test]
    fn test_random_draw_stays_in_range() {
        let draw = RandomDraw;
        for _ in 0..200 {
            assert!(draw.draw_index(12) < 12);
        }
        assert_eq!(FixedDraw(14).draw_index(12), 2);
    }
}
