// Copyright 2025 - See NOTICE file for copyright holders.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt;

/// Errors raised while validating, encoding or signing channel data.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TypesError {
    /// Per-asset vectors of a channel state differ in length.
    LengthMismatch,
    /// The same asset id appears twice in `asset_ids`.
    DuplicateAsset,
    /// A decoded integer does not fit the native width.
    AmountOverflow,
    /// The byte string is not a valid ABI encoding.
    Decode,
    /// The secret key bytes are not a valid secp256k1 scalar.
    InvalidKey,
    /// Producing a recoverable signature failed.
    Signing,
}

impl fmt::Display for TypesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TypesError::LengthMismatch => "per-asset vectors differ in length",
            TypesError::DuplicateAsset => "duplicate asset id",
            TypesError::AmountOverflow => "integer does not fit native width",
            TypesError::Decode => "invalid ABI encoding",
            TypesError::InvalidKey => "invalid secp256k1 secret key",
            TypesError::Signing => "signing failed",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TypesError {}
