// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identification of the dongle.

use std::{fmt, str::FromStr};

/// The strings of the device information characteristics.
///
/// Characteristics that are not set read as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DongleInfo {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub hardware: String,
    pub software: String,
    pub manufacturer: String,
    pub product: String,
}

impl DongleInfo {
    pub fn software_revision(&self) -> SoftwareRevision {
        SoftwareRevision::parse(&self.software)
    }
}

/// Interpret the value of a string characteristic.
///
/// Unset characteristics are empty or start with a zero byte.
pub(crate) fn decode_string(bytes: &[u8]) -> String {
    match bytes.first() {
        Some(first) if *first >= b'0' => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    }
}

/// Semantic version of the dongle software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SoftwareRevision {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl SoftwareRevision {
    /// Parse the first two or three numbers of a version string.
    ///
    /// The separators are arbitrary. A missing patch level is 0 and a
    /// string without at least two numbers results in 0.0.0.
    #[must_use]
    pub fn parse(version: &str) -> Self {
        let mut numbers = version
            .split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .take(3)
            .map(u8::from_str);
        let (Some(Ok(major)), Some(Ok(minor))) = (numbers.next(), numbers.next()) else {
            return Self::default();
        };
        let patch = match numbers.next() {
            Some(Ok(patch)) => patch,
            Some(Err(_)) => return Self::default(),
            None => 0,
        };
        Self {
            major,
            minor,
            patch,
        }
    }

    /// A single number that compares like the version.
    #[must_use]
    pub fn scalar(self) -> u32 {
        u32::from(self.patch) + (u32::from(self.minor) << 8) + (u32::from(self.major) << 16)
    }
}

impl fmt::Display for SoftwareRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
