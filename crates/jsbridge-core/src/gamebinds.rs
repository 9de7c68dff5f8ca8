//! Game-bind dispatcher.
//!
//! Game binds are the host's own input actions, addressed by integer ordinal.
//! Synthesized presses and releases go through the shared [`InputQueue`] so
//! they interleave with physical input in enqueue order.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::input::{InputEvent, InputQueue};

/// Built-in host input actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum GameBind {
    MoveForward = 0,
    MoveBackward = 1,
    MoveLeft = 2,
    MoveRight = 3,
    MoveTurnLeft = 4,
    MoveTurnRight = 5,
    Dodge = 6,
    AutoRun = 7,
    Walk = 8,
    Jump = 9,
    SwimUp = 10,
    SwimDown = 11,
    AboutFace = 12,

    WeaponSwap = 17,
    Weapon1 = 18,
    Weapon2 = 19,
    Weapon3 = 20,
    Weapon4 = 21,
    Weapon5 = 22,
    Heal = 23,
    Utility1 = 24,
    Utility2 = 25,
    Utility3 = 26,
    Elite = 27,
    Profession1 = 28,
    Profession2 = 29,
    Profession3 = 30,
    Profession4 = 31,
    Profession5 = 32,
    Profession6 = 33,
    Profession7 = 34,
    SpecialAction = 35,

    UiCommerce = 41,
    UiContacts = 42,
    UiGuild = 43,
    UiHero = 44,
    UiInventory = 45,
    UiPets = 46,
    UiLogout = 47,
    UiOptions = 48,
    UiPartyFinder = 49,
    UiPvp = 50,
    UiWvw = 51,

    CameraFree = 53,
    CameraZoomIn = 54,
    CameraZoomOut = 55,

    TargetCall = 57,
    TargetTake = 58,
    TargetEnemyNearest = 61,
    TargetEnemyNext = 62,
    TargetEnemyPrev = 63,
    TargetAllyNearest = 64,

    MapOpen = 70,
    MountToggle = 150,
}

const ALL: &[GameBind] = &[
    GameBind::MoveForward,
    GameBind::MoveBackward,
    GameBind::MoveLeft,
    GameBind::MoveRight,
    GameBind::MoveTurnLeft,
    GameBind::MoveTurnRight,
    GameBind::Dodge,
    GameBind::AutoRun,
    GameBind::Walk,
    GameBind::Jump,
    GameBind::SwimUp,
    GameBind::SwimDown,
    GameBind::AboutFace,
    GameBind::WeaponSwap,
    GameBind::Weapon1,
    GameBind::Weapon2,
    GameBind::Weapon3,
    GameBind::Weapon4,
    GameBind::Weapon5,
    GameBind::Heal,
    GameBind::Utility1,
    GameBind::Utility2,
    GameBind::Utility3,
    GameBind::Elite,
    GameBind::Profession1,
    GameBind::Profession2,
    GameBind::Profession3,
    GameBind::Profession4,
    GameBind::Profession5,
    GameBind::Profession6,
    GameBind::Profession7,
    GameBind::SpecialAction,
    GameBind::UiCommerce,
    GameBind::UiContacts,
    GameBind::UiGuild,
    GameBind::UiHero,
    GameBind::UiInventory,
    GameBind::UiPets,
    GameBind::UiLogout,
    GameBind::UiOptions,
    GameBind::UiPartyFinder,
    GameBind::UiPvp,
    GameBind::UiWvw,
    GameBind::CameraFree,
    GameBind::CameraZoomIn,
    GameBind::CameraZoomOut,
    GameBind::TargetCall,
    GameBind::TargetTake,
    GameBind::TargetEnemyNearest,
    GameBind::TargetEnemyNext,
    GameBind::TargetEnemyPrev,
    GameBind::TargetAllyNearest,
    GameBind::MapOpen,
    GameBind::MountToggle,
];

impl GameBind {
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        ALL.iter().copied().find(|b| b.ordinal() == ordinal)
    }

    /// Like [`GameBind::from_ordinal`], failing with `InvalidArgument`.
    pub fn try_from_ordinal(ordinal: i32) -> Result<Self> {
        Self::from_ordinal(ordinal)
            .ok_or_else(|| BridgeError::invalid(format!("unknown game bind {ordinal}")))
    }

    pub const fn ordinal(self) -> i32 {
        self as i32
    }

    pub const fn all() -> &'static [Self] {
        ALL
    }
}

impl fmt::Display for GameBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.ordinal())
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledRelease {
    bind: GameBind,
    due: Instant,
}

/// Synthesizes game-bind input on the shared queue.
#[derive(Debug)]
pub struct GameBindDispatcher {
    input: InputQueue,
    scheduled: Mutex<Vec<ScheduledRelease>>,
}

impl GameBindDispatcher {
    pub fn new(input: InputQueue) -> Self {
        Self {
            input,
            scheduled: Mutex::new(Vec::new()),
        }
    }

    pub fn press(&self, bind: GameBind) {
        debug!(%bind, "press");
        self.input.push(InputEvent::GameBind {
            bind,
            pressed: true,
        });
    }

    pub fn release(&self, bind: GameBind) {
        debug!(%bind, "release");
        self.input.push(InputEvent::GameBind {
            bind,
            pressed: false,
        });
    }

    /// Press now and release once `duration` has elapsed on the frame clock.
    pub fn invoke(&self, bind: GameBind, duration: Duration, now: Instant) {
        self.press(bind);
        if duration.is_zero() {
            self.release(bind);
            return;
        }
        self.scheduled.lock().push(ScheduledRelease {
            bind,
            due: now + duration,
        });
    }

    /// Enqueue every release due at `now`, earliest first. Called once per
    /// frame before the input queue is drained.
    pub fn release_due(&self, now: Instant) -> usize {
        let mut due: Vec<ScheduledRelease> = {
            let mut scheduled = self.scheduled.lock();
            let (ready, waiting): (Vec<_>, Vec<_>) =
                scheduled.drain(..).partition(|s| s.due <= now);
            *scheduled = waiting;
            ready
        };
        due.sort_by_key(|s| s.due);
        for s in &due {
            self.release(s.bind);
        }
        due.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_ordinals_round_trip() {
        for bind in GameBind::all() {
            assert_eq!(GameBind::from_ordinal(bind.ordinal()), Some(*bind));
        }
        assert_eq!(GameBind::from_ordinal(9), Some(GameBind::Jump));
        assert!(GameBind::from_ordinal(-1).is_none());
        assert!(GameBind::try_from_ordinal(9999).is_err());
    }

    #[test]
    fn test_press_release_enqueue_in_order() {
        let queue = InputQueue::new();
        let dispatcher = GameBindDispatcher::new(queue.clone());
        dispatcher.press(GameBind::Jump);
        dispatcher.release(GameBind::Jump);
        assert_eq!(
            queue.drain(),
            vec![
                InputEvent::GameBind {
                    bind: GameBind::Jump,
                    pressed: true
                },
                InputEvent::GameBind {
                    bind: GameBind::Jump,
                    pressed: false
                },
            ]
        );
    }

    #[test]
    fn test_invoke_releases_when_due() {
        let queue = InputQueue::new();
        let dispatcher = GameBindDispatcher::new(queue.clone());
        let t0 = Instant::now();

        dispatcher.invoke(GameBind::Dodge, Duration::from_millis(100), t0);
        assert_eq!(queue.drain().len(), 1);

        assert_eq!(dispatcher.release_due(t0 + Duration::from_millis(50)), 0);
        assert_eq!(dispatcher.scheduled_len(), 1);

        assert_eq!(dispatcher.release_due(t0 + Duration::from_millis(100)), 1);
        assert_eq!(
            queue.drain(),
            vec![InputEvent::GameBind {
                bind: GameBind::Dodge,
                pressed: false
            }]
        );
    }

    #[test]
    fn test_invoke_zero_duration_releases_immediately() {
        let queue = InputQueue::new();
        let dispatcher = GameBindDispatcher::new(queue.clone());
        dispatcher.invoke(GameBind::Heal, Duration::ZERO, Instant::now());
        assert_eq!(queue.drain().len(), 2);
        assert_eq!(dispatcher.scheduled_len(), 0);
    }
}
