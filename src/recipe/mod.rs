// src/recipe/mod.rs

//! Recipe discovery, parsing, and caching (spec §3/§4.5/§4.6).

pub mod discovery;
pub mod model;
pub mod srcinfo_cache;
pub mod srcinfo_parser;

pub use discovery::{build_index, discover_pkgbuilds, filter_pkgbuilds, reparse_recipe, RecipeIndex};
pub use model::{DepName, Recipe, Subrecipe};
pub use srcinfo_cache::SrcinfoMeta;
pub use srcinfo_parser::parse_srcinfo;
