/// Tolerance used for "is this duration / tick time usable as a divisor".
pub const SMALL_NUMBER: f32 = 1.0e-8;

/// Looser tolerance for "nearly zero" vector and time comparisons.
///
/// Also the overshoot added to a partial end tick so the source reliably crosses its duration.
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// Start time sentinel meaning "active as soon as it is promoted".
pub const INVALID_START_TIME: f32 = -f32::MAX;

/// Reserved source id. Never handed out by the allocator.
pub const INVALID_SOURCE_ID: u16 = 0;

/// Gravity acceleration magnitude (m/s^2) along the current gravity direction.
pub const DEFAULT_GRAVITY_MPS2: f32 = 9.8;

/// Canonical "down" the gravity-relative frame is built around (+Z is up).
pub const CANONICAL_DOWN: [f32; 3] = [0.0, 0.0, -1.0];

/// Share of a rewound time gap a catching-up source makes up per authoritative update.
pub const DEFAULT_MAX_TIME_DELTA_CORRECTION_PERCENT: f32 = 0.5;

/// Largest amount of time (seconds) a catching-up source may skip in one tick.
pub const DEFAULT_MAX_TIME_DELTA_CORRECTION_ABSOLUTE: f32 = 0.5;

/// Upper bound on serialized sources per array (count is a single byte).
pub const MAX_SOURCES_TO_SERIALIZE: u8 = u8::MAX;

/// Largest single move a server will simulate (seconds).
pub const MAX_MOVE_DELTA_TIME: f32 = 0.125;

/// Default squared position error (m^2) tolerated before the server corrects a client.
///
/// 5cm of drift.
pub const MAX_POSITION_ERROR_SQ: f32 = 0.05 * 0.05;

/// Client timestamps wrap back toward zero after this many seconds to keep f32 precision.
pub const MIN_TIME_BETWEEN_TIMESTAMP_RESETS: f32 = 240.0;

/// Upper bound on the size of a packed move or response payload.
pub const MAX_PACKED_BITS: u32 = 4096;

/// Simulated proxies only replay root-motion snapshots younger than this (seconds).
pub const ROOT_MOTION_REP_MOVE_MAX_AGE: f32 = 0.5;

/// Server→local root-motion id mappings refreshed within this window stay valid (seconds).
pub const ID_MAPPING_VALIDITY: f32 = 3.0;

/// Pitch limit applied to the gravity-relative view rotation (degrees).
pub const VIEW_PITCH_LIMIT_DEG: f32 = 89.9;

/// Quantization scale for acceleration (0.1 m/s^2 steps).
pub const ACCELERATION_QUANTIZE_SCALE: f32 = 10.0;

/// Quantization scale for location/velocity (1cm steps).
pub const LOCATION_QUANTIZE_SCALE: f32 = 100.0;
