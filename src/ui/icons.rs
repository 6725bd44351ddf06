//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Run indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⏭️  ", "[-]");
pub static GATE: Emoji<'_, '_> = Emoji("🚧 ", "[GATE]");
pub static SCORE: Emoji<'_, '_> = Emoji("📊 ", "[SCORE]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
