//! Logical message addressing.
//!
//! On the wire a message's audience is three loose attributes. Internally it is
//! one of four [`Target`]s. This module is the only place the two views are
//! converted, so the precedence rule of [`Target::classify`] lives here alone.

use crate::message::{KernelProcess, MessageDisplay};

/// The raw wire triple: who sees the message, and whether and how the kernel
/// handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub display: MessageDisplay,
    pub kernel_process: KernelProcess,
    pub kernel_display: MessageDisplay,
}

/// Logical recipient of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Shown to the user; never processed by the kernel.
    User,
    /// Hidden from the user; always processed by the kernel.
    Kernel,
    /// Hidden kernel input produced while building a conversation.
    Build,
    /// Shown to the user and processed by the kernel bot.
    Bot,
}

impl Target {
    pub const ALL: [Target; 4] = [Target::User, Target::Kernel, Target::Build, Target::Bot];

    /// Canonical wire triple for this target.
    pub fn resolve(self) -> Address {
        let (display, kernel_process, kernel_display) = match self {
            Target::User => (
                MessageDisplay::Default,
                KernelProcess::Prevent,
                MessageDisplay::Default,
            ),
            Target::Kernel => (
                MessageDisplay::Hidden,
                KernelProcess::Force,
                MessageDisplay::Default,
            ),
            Target::Build => (
                MessageDisplay::Hidden,
                KernelProcess::Force,
                MessageDisplay::WizardInput,
            ),
            Target::Bot => (
                MessageDisplay::Default,
                KernelProcess::Process,
                MessageDisplay::Default,
            ),
        };
        Address {
            display,
            kernel_process,
            kernel_display,
        }
    }

    /// Classify any triple, canonical or not.
    ///
    /// Precedence: a `Process` kernel flag means Bot; otherwise a default
    /// display means User; otherwise a default kernel display means Kernel;
    /// anything else is Build.
    pub fn classify(address: Address) -> Target {
        if address.kernel_process == KernelProcess::Process {
            Target::Bot
        } else if address.display == MessageDisplay::Default {
            Target::User
        } else if address.kernel_display == MessageDisplay::Default {
            Target::Kernel
        } else {
            Target::Build
        }
    }

    /// Lowercase name used in logs and pick lists.
    pub fn as_str(self) -> &'static str {
        match self {
            Target::User => "user",
            Target::Kernel => "kernel",
            Target::Build => "build",
            Target::Bot => "bot",
        }
    }
}

/// Entry of the target picker offered to wizard authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetItem {
    pub target: Target,
    pub label: &'static str,
    pub key: &'static str,
}

/// Targets a wizard can address a constructed message to.
pub const BOT_TARGETS: [TargetItem; 3] = [
    TargetItem {
        target: Target::User,
        label: "User",
        key: "t",
    },
    TargetItem {
        target: Target::Kernel,
        label: "Kernel",
        key: "k",
    },
    TargetItem {
        target: Target::Build,
        label: "Build",
        key: "b",
    },
];
