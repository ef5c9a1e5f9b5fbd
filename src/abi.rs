pub const STACK_FRAME_TYPE: &str = "__cilkrts_stack_frame";
pub const FRAME_VAR: &str = "__cilk_sf";

pub const ENTER_FRAME: &str = "__cilkrts_enter_frame_1";
pub const ENTER_FRAME_FAST: &str = "__cilkrts_enter_frame_fast_1";
pub const DETACH: &str = "__cilkrts_detach";
pub const SYNC: &str = "__cilkrts_sync";
pub const POP_FRAME: &str = "__cilkrts_pop_frame";
pub const LEAVE_FRAME: &str = "__cilkrts_leave_frame";
pub const SAVE_FP_CTRL_STATE: &str = "__cilkrts_save_fp_ctrl_state";
pub const CILK_FOR_32: &str = "__cilkrts_cilk_for_32";
pub const CILK_FOR_64: &str = "__cilkrts_cilk_for_64";

pub const FRAME_UNSYNCHED: &str = "CILK_FRAME_UNSYNCHED";
pub const FRAME_VERSION: &str = "CILK_FRAME_VERSION";
