//! Study discovery: pick descriptor files out of a listing. No I/O.

use crate::listing::ObjectListing;
use crate::naming::StudyDescriptor;

/// Every descriptor path in `listing`, in listing order.
pub fn discover_studies(listing: &ObjectListing) -> Vec<StudyDescriptor> {
    listing.paths().filter_map(StudyDescriptor::new).collect()
}
