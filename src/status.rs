//   Copyright 2018 Egor Larionov
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

use ipopt_bridge_sys as ffi;

/// Program return status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    SolveSucceeded,
    SolvedToAcceptableLevel,
    InfeasibleProblemDetected,
    SearchDirectionBecomesTooSmall,
    DivergingIterates,
    UserRequestedStop,
    FeasiblePointFound,
    MaximumIterationsExceeded,
    RestorationFailed,
    ErrorInStepComputation,
    MaximumCpuTimeExceeded,
    NotEnoughDegreesOfFreedom,
    InvalidProblemDefinition,
    InvalidOption,
    InvalidNumberDetected,
    UnrecoverableException,
    NonIpoptExceptionThrown,
    InsufficientMemory,
    InternalError,
    /// A code this crate does not know about.
    Unknown(ffi::ApplicationReturnStatus),
}

/// Coarse classification of a [`SolveStatus`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Acceptable,
    Infeasible,
    StepFailure,
    IterationLimit,
    TimeLimit,
    RestorationFailure,
    UserStop,
    EvaluationError,
    InvalidSetup,
    InternalError,
}

impl SolveStatus {
    pub fn from_raw(status: ffi::ApplicationReturnStatus) -> Self {
        use SolveStatus as RS;
        match status {
            ffi::ApplicationReturnStatus_Solve_Succeeded              => RS::SolveSucceeded,
            ffi::ApplicationReturnStatus_Solved_To_Acceptable_Level   => RS::SolvedToAcceptableLevel,
            ffi::ApplicationReturnStatus_Infeasible_Problem_Detected  => RS::InfeasibleProblemDetected,
            ffi::ApplicationReturnStatus_Search_Direction_Becomes_Too_Small
                => RS::SearchDirectionBecomesTooSmall,
            ffi::ApplicationReturnStatus_Diverging_Iterates            => RS::DivergingIterates,
            ffi::ApplicationReturnStatus_User_Requested_Stop           => RS::UserRequestedStop,
            ffi::ApplicationReturnStatus_Feasible_Point_Found          => RS::FeasiblePointFound,
            ffi::ApplicationReturnStatus_Maximum_Iterations_Exceeded   => RS::MaximumIterationsExceeded,
            ffi::ApplicationReturnStatus_Restoration_Failed            => RS::RestorationFailed,
            ffi::ApplicationReturnStatus_Error_In_Step_Computation     => RS::ErrorInStepComputation,
            ffi::ApplicationReturnStatus_Maximum_CpuTime_Exceeded      => RS::MaximumCpuTimeExceeded,
            ffi::ApplicationReturnStatus_Not_Enough_Degrees_Of_Freedom => RS::NotEnoughDegreesOfFreedom,
            ffi::ApplicationReturnStatus_Invalid_Problem_Definition    => RS::InvalidProblemDefinition,
            ffi::ApplicationReturnStatus_Invalid_Option                => RS::InvalidOption,
            ffi::ApplicationReturnStatus_Invalid_Number_Detected       => RS::InvalidNumberDetected,
            ffi::ApplicationReturnStatus_Unrecoverable_Exception       => RS::UnrecoverableException,
            ffi::ApplicationReturnStatus_NonIpopt_Exception_Thrown     => RS::NonIpoptExceptionThrown,
            ffi::ApplicationReturnStatus_Insufficient_Memory           => RS::InsufficientMemory,
            ffi::ApplicationReturnStatus_Internal_Error                => RS::InternalError,
            code => RS::Unknown(code),
        }
    }

    /// The integer code of this status.
    pub fn raw(self) -> ffi::ApplicationReturnStatus {
        use SolveStatus as RS;
        match self {
            RS::SolveSucceeded                 => ffi::ApplicationReturnStatus_Solve_Succeeded,
            RS::SolvedToAcceptableLevel        => ffi::ApplicationReturnStatus_Solved_To_Acceptable_Level,
            RS::InfeasibleProblemDetected      => ffi::ApplicationReturnStatus_Infeasible_Problem_Detected,
            RS::SearchDirectionBecomesTooSmall
                => ffi::ApplicationReturnStatus_Search_Direction_Becomes_Too_Small,
            RS::DivergingIterates              => ffi::ApplicationReturnStatus_Diverging_Iterates,
            RS::UserRequestedStop              => ffi::ApplicationReturnStatus_User_Requested_Stop,
            RS::FeasiblePointFound             => ffi::ApplicationReturnStatus_Feasible_Point_Found,
            RS::MaximumIterationsExceeded      => ffi::ApplicationReturnStatus_Maximum_Iterations_Exceeded,
            RS::RestorationFailed              => ffi::ApplicationReturnStatus_Restoration_Failed,
            RS::ErrorInStepComputation         => ffi::ApplicationReturnStatus_Error_In_Step_Computation,
            RS::MaximumCpuTimeExceeded         => ffi::ApplicationReturnStatus_Maximum_CpuTime_Exceeded,
            RS::NotEnoughDegreesOfFreedom      => ffi::ApplicationReturnStatus_Not_Enough_Degrees_Of_Freedom,
            RS::InvalidProblemDefinition       => ffi::ApplicationReturnStatus_Invalid_Problem_Definition,
            RS::InvalidOption                  => ffi::ApplicationReturnStatus_Invalid_Option,
            RS::InvalidNumberDetected          => ffi::ApplicationReturnStatus_Invalid_Number_Detected,
            RS::UnrecoverableException         => ffi::ApplicationReturnStatus_Unrecoverable_Exception,
            RS::NonIpoptExceptionThrown        => ffi::ApplicationReturnStatus_NonIpopt_Exception_Thrown,
            RS::InsufficientMemory             => ffi::ApplicationReturnStatus_Insufficient_Memory,
            RS::InternalError                  => ffi::ApplicationReturnStatus_Internal_Error,
            RS::Unknown(code) => code,
        }
    }

    pub fn kind(self) -> StatusKind {
        use SolveStatus as RS;
        match self {
            RS::SolveSucceeded | RS::FeasiblePointFound => StatusKind::Success,
            RS::SolvedToAcceptableLevel => StatusKind::Acceptable,
            RS::InfeasibleProblemDetected => StatusKind::Infeasible,
            RS::SearchDirectionBecomesTooSmall
            | RS::DivergingIterates
            | RS::ErrorInStepComputation => StatusKind::StepFailure,
            RS::MaximumIterationsExceeded => StatusKind::IterationLimit,
            RS::MaximumCpuTimeExceeded => StatusKind::TimeLimit,
            RS::RestorationFailed => StatusKind::RestorationFailure,
            RS::UserRequestedStop => StatusKind::UserStop,
            RS::InvalidNumberDetected => StatusKind::EvaluationError,
            RS::NotEnoughDegreesOfFreedom | RS::InvalidProblemDefinition | RS::InvalidOption => {
                StatusKind::InvalidSetup
            }
            RS::UnrecoverableException
            | RS::NonIpoptExceptionThrown
            | RS::InsufficientMemory
            | RS::InternalError
            | RS::Unknown(_) => StatusKind::InternalError,
        }
    }

    /// `true` if the returned point can be trusted as a (possibly loosely) converged solution.
    pub fn is_solved(self) -> bool {
        matches!(self.kind(), StatusKind::Success | StatusKind::Acceptable)
    }
}
