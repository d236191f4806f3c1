pub mod mmr;

pub use mmr::DiversitySelector;
