mod run;

pub(crate) use run::{FrameExit, run_frame};
