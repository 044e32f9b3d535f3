//! CAR-like export document.
//!
//! Not a real CARv1 archive: a JSON manifest listing object metadata,
//! suitable for moving an index between gateways.

use serde::{Deserialize, Serialize};

use super::content::ContentObject;

pub const CAR_EXPORT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CarExport {
    pub version: u32,
    pub objects: Vec<ContentObject>,
}

impl CarExport {
    pub fn new(objects: Vec<ContentObject>) -> Self {
        Self {
            version: CAR_EXPORT_VERSION,
            objects,
        }
    }
}
