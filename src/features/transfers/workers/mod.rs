mod reclamation_sweeper;

pub use reclamation_sweeper::ReclamationSweeper;
