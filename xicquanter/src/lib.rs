mod args;
mod driver;
mod input;
mod progress;
mod write;

pub use args::*;
pub use driver::{XicQuanter, XicQuanterError};
pub use input::{
    open_input, ChargeRecord, CrosslinkRecord, DocumentRecord, FileRecord, IsotopeRecord,
    LabelGroupRecord,
};
pub use progress::ProgressRecord;
pub use write::{open_output, write_integrals, write_ratios, INTEGRAL_HEADER, RATIO_HEADER};
