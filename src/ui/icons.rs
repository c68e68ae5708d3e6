//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static HOURGLASS: Emoji<'_, '_> = Emoji("⏳ ", "[~]");

// Cell indicators
pub static ARM: Emoji<'_, '_> = Emoji("🦾 ", "[ARM]");
pub static GRIPPER: Emoji<'_, '_> = Emoji("🤏 ", "[GRIP]");
pub static TRUCK: Emoji<'_, '_> = Emoji("🚚 ", "[TRUCK]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
