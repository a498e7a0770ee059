pub mod field;
pub mod rule;
pub mod schema;
pub mod section;
pub mod validator;

pub use field::{Field, FieldType, OptionItem, OptionsSource, RemoteOptions};
pub use rule::{Action, Actions, Rule};
pub use schema::{Schema, SubmissionConfig};
pub use section::{LayoutRow, Section, Subsection, subsection_key};
pub use validator::{Validator, ValidatorKind};
