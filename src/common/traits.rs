//! Common traits defining interfaces for the tracking controller

/// Trait for vehicle motion models
///
/// Implementations are pure: the same inputs always give the same next state.
/// One implementation serves both the latency projection and the horizon
/// dynamics constraints.
pub trait MotionModel {
    /// State type
    type State;
    /// Control type
    type Control;

    /// Propagate state forward by one discrete step of length `dt`
    fn propagate(&self, state: &Self::State, control: &Self::Control, dt: f64) -> Self::State;
}

/// Trait for feedback controllers driven once per control tick
///
/// All memory between ticks lives in `State`, which is passed in and handed
/// back, so a controller value can be shared between independent vehicles.
pub trait Controller {
    type Input;
    type Output;
    type State: Default;

    fn step(&self, input: &Self::Input, state: Self::State) -> (Self::Output, Self::State);
}
