mod absence;
mod agent;
mod alert;
mod assignment;
mod checkin;
mod round;
mod sample;

pub use absence::{Absence, NO_ARRIVAL_REASON};
pub use agent::{Agent, AgentStats, Presence};
pub use alert::{Alert, AlertAction, AlertKind, AlertState, AlertSubject, Severity};
pub use assignment::{Assignment, AssignmentStatus};
pub use checkin::{CheckIn, CheckInAction, CheckInKind, CheckInState};
pub use round::{Round, RoundStatus};
pub use sample::{PositionSample, SampleSource};
