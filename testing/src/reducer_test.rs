//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use rollcall_core::effect::Effect;
use rollcall_core::reducer::Reducer;

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion = Box<dyn FnOnce(&[Effect])>;

/// Type alias for error assertion functions
type ErrorAssertion<Err> = Box<dyn FnOnce(&Err)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// A rejected action leaves the state as it was given, so state assertions
/// also run after an error.
///
/// # Example
///
/// ```ignore
/// use rollcall_testing::ReducerTest;
///
/// ReducerTest::new(SignupReducer)
///     .with_env(test_environment())
///     .given_state(standard_raid("r1"))
///     .when_action(SignupAction::Close { by: None, reason: None })
///     .then_state(|record| assert!(record.stats_finalized))
///     .then_effects(|effects| assert!(effects.contains(&Effect::FinalizeStats)))
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    action: Option<R::Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    effect_assertions: Vec<EffectAssertion>,
    error_assertions: Vec<ErrorAssertion<R::Error>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone,
    R::Error: std::fmt::Debug,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    ///
    /// Expects the action to succeed.
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the rejection (Then)
    ///
    /// Expects the action to fail.
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Error) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set, if the
    /// outcome (success or rejection) does not match the assertions given,
    /// or if any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let initial = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let action = self.action.expect("Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        // Reduce against a scratch copy; commit only on success
        let mut scratch = initial.clone();
        let outcome = self.reducer.reduce(&mut scratch, action, &env);

        match outcome {
            Ok(effects) => {
                assert!(
                    self.error_assertions.is_empty(),
                    "Expected the action to be rejected, but it succeeded with {} effects",
                    effects.len()
                );
                for assertion in self.state_assertions {
                    assertion(&scratch);
                }
                for assertion in self.effect_assertions {
                    assertion(&effects);
                }
            },
            Err(error) => {
                assert!(
                    self.effect_assertions.is_empty(),
                    "Expected the action to succeed, but it was rejected: {error:?}"
                );
                for assertion in self.state_assertions {
                    assertion(&initial);
                }
                for assertion in self.error_assertions {
                    assertion(&error);
                }
            },
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use rollcall_core::effect::Effect;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects(effects: &[Effect]) {
        assert!(
            effects.is_empty(),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count(effects: &[Effect], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain a render
    ///
    /// # Panics
    ///
    /// Panics if no `Render` effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_renders(effects: &[Effect]) {
        assert!(
            effects.contains(&Effect::Render),
            "Expected a Render effect, but found {effects:?}"
        );
    }

    /// Count the `FinalizeStats` effects
    #[must_use]
    pub fn finalize_count(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|effect| matches!(effect, Effect::FinalizeStats))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::reducer::Reducer;
    use smallvec::{SmallVec, smallvec};

    #[derive(Clone, Debug)]
    struct TestState {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;
        type Error = String;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> Result<SmallVec<[Effect; 4]>, String> {
            match action {
                TestAction::Increment => {
                    state.count += 1;
                    Ok(smallvec![Effect::Render])
                },
                TestAction::Decrement => {
                    if state.count == 0 {
                        return Err("already zero".to_string());
                    }
                    state.count -= 1;
                    Ok(SmallVec::new())
                },
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Increment)
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_renders(effects);
            })
            .run();
    }

    #[test]
    fn test_rejection_keeps_state() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Decrement)
            .then_state(|state| {
                assert_eq!(state.count, 0);
            })
            .then_error(|error| {
                assert_eq!(error, "already zero");
            })
            .run();
    }

    #[test]
    fn test_assertions_no_effects() {
        assertions::assert_no_effects(&[]);
        assert_eq!(assertions::finalize_count(&[Effect::FinalizeStats]), 1);
    }
}
