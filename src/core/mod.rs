// Core modules implementing specs, storage backends, and error modeling.
pub mod backend;
pub mod delimited;
pub mod error;
pub mod fixed_width;
pub mod location;
pub mod registry;
pub mod row;
pub mod spec;
pub mod spec_text;
