//! Cleanup selection when a client/engine binding ends.
//!
//! Each [`UnbindCause`] maps to a fixed [`CleanupActions`] tuple. The table
//! is a plain exhaustive `match`: adding a cause does not compile until its
//! row is written.
//!
//! | Cause             | clear agent | clear listeners + flags | stop input |
//! |-------------------|-------------|-------------------------|------------|
//! | `ClientDied`      | no          | no                      | yes        |
//! | `ClientUnfocused` | yes         | yes                     | yes        |
//! | `ClientCloseSelf` | yes         | yes                     | yes        |
//! | `ImeDied`         | yes         | no                      | no         |
//! | `ImeSwitch`       | yes         | no                      | yes        |
//! | `ImeClearSelf`    | yes         | no                      | yes        |
//!
//! The keyboard-visible flag is never part of a cleanup; [`CleanupTarget`]
//! has no way to touch it.

use std::fmt;

use crate::trace::debug;

/// Why a binding ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnbindCause {
    ClientDied,
    ClientUnfocused,
    /// The caller has already cleared the agent before unbinding.
    ClientCloseSelf,
    ImeDied,
    ImeSwitch,
    /// Only raised by the engine proxy.
    ImeClearSelf,
}

/// What to clean up for one cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupActions {
    pub clear_agent: bool,
    pub clear_listeners_and_flags: bool,
    pub invoke_stop_input: bool,
}

impl CleanupActions {
    const fn new(clear_agent: bool, clear_listeners_and_flags: bool, invoke_stop_input: bool) -> Self {
        Self {
            clear_agent,
            clear_listeners_and_flags,
            invoke_stop_input,
        }
    }
}

/// State touched by an unbind.
pub trait CleanupTarget {
    fn clear_agent(&mut self);
    fn clear_listeners_and_flags(&mut self);
    fn stop_input(&mut self);
}

impl UnbindCause {
    pub const ALL: [Self; 6] = [
        Self::ClientDied,
        Self::ClientUnfocused,
        Self::ClientCloseSelf,
        Self::ImeDied,
        Self::ImeSwitch,
        Self::ImeClearSelf,
    ];

    #[must_use]
    pub const fn actions(self) -> CleanupActions {
        match self {
            Self::ClientDied => CleanupActions::new(false, false, true),
            Self::ClientUnfocused | Self::ClientCloseSelf => CleanupActions::new(true, true, true),
            Self::ImeDied => CleanupActions::new(true, false, false),
            Self::ImeSwitch | Self::ImeClearSelf => CleanupActions::new(true, false, true),
        }
    }

    /// Runs this cause's cleanup against `target`, each action at most once.
    pub fn apply<T: CleanupTarget + ?Sized>(self, target: &mut T) -> CleanupActions {
        let actions = self.actions();
        debug!(cause = %self, ?actions, "unbind cleanup");
        if actions.clear_agent {
            target.clear_agent();
        }
        if actions.clear_listeners_and_flags {
            target.clear_listeners_and_flags();
        }
        if actions.invoke_stop_input {
            target.stop_input();
        }
        actions
    }
}

impl fmt::Display for UnbindCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClientDied => "client-died",
            Self::ClientUnfocused => "client-unfocused",
            Self::ClientCloseSelf => "client-close-self",
            Self::ImeDied => "ime-died",
            Self::ImeSwitch => "ime-switch",
            Self::ImeClearSelf => "ime-clear-self",
        };
        f.write_str(s)
    }
}
