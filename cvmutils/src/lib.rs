// Misc utilities useful to both bootlog and bootlyze.

mod command;
mod csvfile;
mod dates;

// Run a shell command with a timeout, capturing stdout.

pub use command::run_with_timeout;

// Append-only CSV result file: one header, whole rows, single writer.

pub use csvfile::ResultFile;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;

// The time right now.

pub use dates::now;

// The time right now, as floating epoch seconds.

pub use dates::now_epoch_secs;

// Parse an ISO8601 / RFC3339 timestamp into floating epoch seconds.

pub use dates::parse_iso_timestamp;

// Convert a microsecond epoch timestamp into floating epoch seconds.

pub use dates::micros_to_secs;
