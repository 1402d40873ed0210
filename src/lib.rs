// Battery profiler - calibration and runtime estimation for battery packs
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
