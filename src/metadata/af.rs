//! Autofocus state machine
//!
//! Simulates a lens travelling between a minimum and a maximum focus distance
//! (in diopters) in fixed increments. Each evaluation is one frame: scans move the
//! lens one increment per frame until it reaches the mode's target, so a scan never
//! lasts longer than `focus_steps` frames.

use serde::{Deserialize, Serialize};

/// `CONTROL_AF_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AfMode {
    #[default]
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
    Edof,
}

impl AfMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Auto,
            2 => Self::Macro,
            3 => Self::ContinuousVideo,
            4 => Self::ContinuousPicture,
            5 => Self::Edof,
            _ => Self::Off,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Auto => 1,
            Self::Macro => 2,
            Self::ContinuousVideo => 3,
            Self::ContinuousPicture => 4,
            Self::Edof => 5,
        }
    }

    fn is_continuous(self) -> bool {
        matches!(self, Self::ContinuousVideo | Self::ContinuousPicture)
    }
}

/// `CONTROL_AF_TRIGGER`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AfTrigger {
    #[default]
    Idle,
    Start,
    Cancel,
}

impl AfTrigger {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Start,
            2 => Self::Cancel,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Start => 1,
            Self::Cancel => 2,
        }
    }
}

/// `CONTROL_AF_STATE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AfState {
    #[default]
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
    PassiveUnfocused,
}

impl AfState {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Inactive => 0,
            Self::PassiveScan => 1,
            Self::PassiveFocused => 2,
            Self::ActiveScan => 3,
            Self::FocusedLocked => 4,
            Self::NotFocusedLocked => 5,
            Self::PassiveUnfocused => 6,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Inactive),
            1 => Some(Self::PassiveScan),
            2 => Some(Self::PassiveFocused),
            3 => Some(Self::ActiveScan),
            4 => Some(Self::FocusedLocked),
            5 => Some(Self::NotFocusedLocked),
            6 => Some(Self::PassiveUnfocused),
            _ => None,
        }
    }

    /// True while the lens is travelling
    pub fn is_scanning(self) -> bool {
        matches!(self, Self::PassiveScan | Self::ActiveScan)
    }

    pub fn is_converged(self) -> bool {
        matches!(
            self,
            Self::PassiveFocused | Self::FocusedLocked | Self::NotFocusedLocked
        )
    }
}

#[derive(Debug, Clone)]
pub struct AfStateMachine {
    focus_steps: u32,
    min_distance: f32,
    max_distance: f32,
    mode: AfMode,
    state: AfState,
    distance: f32,
    target: f32,
}

impl AfStateMachine {
    pub fn new(focus_steps: u32, min_distance: f32, max_distance: f32) -> Self {
        let (min_distance, max_distance) = if min_distance <= max_distance {
            (min_distance, max_distance)
        } else {
            (max_distance, min_distance)
        };

        Self {
            focus_steps: focus_steps.max(1),
            min_distance,
            max_distance,
            mode: AfMode::Off,
            state: AfState::Inactive,
            distance: min_distance,
            target: min_distance,
        }
    }

    /// Feed a new mode/trigger pair and advance one frame.
    pub fn evaluate(&mut self, mode: AfMode, trigger: AfTrigger) -> (AfState, f32) {
        if mode != self.mode {
            log::debug!("AF mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
            self.state = AfState::Inactive;
        }

        match mode {
            AfMode::Off | AfMode::Edof => {
                self.state = AfState::Inactive;
            }
            AfMode::Auto | AfMode::Macro => match trigger {
                AfTrigger::Start => self.begin_scan(AfState::ActiveScan),
                AfTrigger::Cancel => self.state = AfState::Inactive,
                AfTrigger::Idle => self.settle(),
            },
            AfMode::ContinuousVideo | AfMode::ContinuousPicture => match trigger {
                AfTrigger::Start => match self.state {
                    AfState::PassiveFocused | AfState::FocusedLocked => {
                        self.state = AfState::FocusedLocked;
                    }
                    AfState::PassiveUnfocused | AfState::NotFocusedLocked => {
                        self.state = AfState::NotFocusedLocked;
                    }
                    AfState::Inactive | AfState::PassiveScan | AfState::ActiveScan => {
                        self.begin_scan(AfState::ActiveScan);
                    }
                },
                AfTrigger::Cancel => self.state = AfState::Inactive,
                AfTrigger::Idle => {
                    if self.state == AfState::Inactive {
                        self.begin_scan(AfState::PassiveScan);
                    } else {
                        self.settle();
                    }
                }
            },
        }

        self.current()
    }

    /// Advance one frame without new input.
    ///
    /// Only lets an in-flight scan make progress; never starts a scan.
    pub fn reevaluate(&mut self) -> (AfState, f32) {
        self.settle();
        self.current()
    }

    pub fn current(&self) -> (AfState, f32) {
        (self.state, self.distance)
    }

    pub fn mode(&self) -> AfMode {
        self.mode
    }

    pub fn focus_range(&self) -> (f32, f32) {
        (self.min_distance, self.max_distance)
    }

    fn target_for(&self, mode: AfMode) -> f32 {
        match mode {
            AfMode::Macro => self.max_distance,
            _ => (self.min_distance + self.max_distance) / 2.0,
        }
    }

    fn begin_scan(&mut self, scan_state: AfState) {
        self.target = self.target_for(self.mode);
        self.state = scan_state;
    }

    fn settle(&mut self) {
        match self.state {
            AfState::ActiveScan => {
                if self.step_lens() {
                    self.state = AfState::FocusedLocked;
                }
            }
            AfState::PassiveScan => {
                if self.step_lens() {
                    self.state = if self.mode.is_continuous() {
                        AfState::PassiveFocused
                    } else {
                        AfState::Inactive
                    };
                }
            }
            _ => {}
        }
    }

    /// Moves the lens one increment towards the target; true once it arrived.
    fn step_lens(&mut self) -> bool {
        let increment = (self.max_distance - self.min_distance) / self.focus_steps as f32;
        let remaining = self.target - self.distance;

        if remaining.abs() <= increment * 1.001 {
            self.distance = self.target;
            true
        } else {
            self.distance += increment.copysign(remaining);
            false
        }
    }
}

impl Default for AfStateMachine {
    fn default() -> Self {
        Self::new(200, 1.0, 2.0)
    }
}
