mod params;

pub use params::{parse_headers, unique_titles};
