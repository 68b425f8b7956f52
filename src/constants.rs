//! Global constants for halo-atlas
//!
//! Consolidates atlas sizing, font identifier and engine constants
//! to eliminate magic numbers throughout the codebase.

// ============================================================================
// Atlas Sizing
// ============================================================================

/// Initial atlas width as log2 (128px)
pub const INITIAL_WIDTH_LOG2: u32 = 7;

/// Initial atlas height as log2 (128px)
pub const INITIAL_HEIGHT_LOG2: u32 = 7;

/// Largest atlas side as log2 (8192px)
pub const MAX_SIZE_LOG2: u32 = 13;

// ============================================================================
// Glyph Metrics
// ============================================================================

/// Characters with strong ascenders/descenders, used to find a common
/// baseline for every glyph of a font
pub const BASELINE_PROBE_CHARS: [char; 4] = ['j', 'l', ']', '|'];

/// Character whose advance defines the cell width
pub const CELL_WIDTH_CHAR: char = 'W';

/// Codepoint assumed to have no glyph (missing-glyph heuristic reference)
pub const MISSING_GLYPH_CODEPOINT: u32 = 0;

/// Scale factors are compared at this precision when grouping resize jobs
pub const SCALE_KEY_PRECISION: f32 = 10_000.0;

// ============================================================================
// Font Identifier
// ============================================================================

/// Field separator of an encoded font identifier
pub const FONT_ID_SEPARATOR: &str = "###";

// ============================================================================
// Bitmap Engine
// ============================================================================

/// Arena growth granularity (bytes)
pub const ARENA_PAGE_SIZE: usize = 64 * 1024;

/// Default initial arena size (two pages)
pub const DEFAULT_ARENA_BYTES: usize = 2 * ARENA_PAGE_SIZE;

/// Largest alignment the arena hands out (log2)
pub const MAX_ALIGNMENT_LOG2: u32 = 4;

// ============================================================================
// Worker
// ============================================================================

/// Capacity of the worker request queue
pub const WORKER_QUEUE_CAPACITY: usize = 64;

/// Worker start-up timeout in seconds
pub const WORKER_STARTUP_TIMEOUT_SECS: u64 = 3;
