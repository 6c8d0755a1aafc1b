//! Generic ordered task runner
//!
//! A [`Ward`] is a named list of steps. Processing passes the same
//! `(context, data)` pair to each step in registration order and stops at the
//! first step that produces a result. Nothing here knows about patterns or
//! actions; the dispatch pipelines are built on top of it.

use std::fmt;

type StepFn<C, D, R> = Box<dyn Fn(&mut C, &mut D) -> Option<R> + Send + Sync>;

/// A named step
pub struct Task<C, D, R> {
    name: String,
    run: StepFn<C, D, R>,
}

impl<C, D, R> Task<C, D, R> {
    /// Step name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Result of a step that stopped processing
#[derive(Debug)]
pub struct Halt<'a, C, D, R> {
    /// Index of the step that produced the result
    pub index: usize,
    /// Name of that step
    pub name: &'a str,
    /// The result
    pub result: R,
    /// Context the step saw
    pub context: &'a C,
    /// Data the step saw
    pub data: &'a D,
}

/// Ordered list of named steps
pub struct Ward<C, D, R> {
    name: String,
    tasks: Vec<Task<C, D, R>>,
}

impl<C, D, R> Ward<C, D, R> {
    /// Create an empty runner
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Runner name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a named step
    pub fn add<F>(&mut self, name: impl Into<String>, step: F) -> &mut Self
    where
        F: Fn(&mut C, &mut D) -> Option<R> + Send + Sync + 'static,
    {
        let mut name = name.into();
        if name.is_empty() {
            name = format!("task{}", self.tasks.len());
        }
        self.tasks.push(Task {
            name,
            run: Box::new(step),
        });
        self
    }

    /// Append an anonymous step; it is named after its position
    pub fn add_anon<F>(&mut self, step: F) -> &mut Self
    where
        F: Fn(&mut C, &mut D) -> Option<R> + Send + Sync + 'static,
    {
        self.add("", step)
    }

    /// Step names in execution order
    pub fn tasknames(&self) -> Vec<&str> {
        self.tasks.iter().map(Task::name).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the runner has no steps
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every step in order, stopping at the first result
    pub fn process<'a>(&'a self, context: &'a mut C, data: &'a mut D) -> Option<Halt<'a, C, D, R>> {
        self.process_from(0, context, data)
    }

    /// Run steps starting at `start`, stopping at the first result
    pub fn process_from<'a>(
        &'a self,
        start: usize,
        context: &'a mut C,
        data: &'a mut D,
    ) -> Option<Halt<'a, C, D, R>> {
        for (index, task) in self.tasks.iter().enumerate().skip(start) {
            if let Some(result) = (task.run)(context, data) {
                return Some(Halt {
                    index,
                    name: &task.name,
                    result,
                    context,
                    data,
                });
            }
        }
        None
    }
}

impl<C, D, R> fmt::Display for Ward<C, D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[{}]", self.name, self.tasknames().join(","))
    }
}

impl<C, D, R> fmt::Debug for Ward<C, D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_run_in_order() {
        let mut ward: Ward<Vec<&'static str>, u32, ()> = Ward::new("order");
        ward.add("a", |log, n| {
            log.push("a");
            *n += 1;
            None
        })
        .add("b", |log, n| {
            log.push("b");
            *n *= 10;
            None
        });

        let mut log = Vec::new();
        let mut n = 1;
        assert!(ward.process(&mut log, &mut n).is_none());
        assert_eq!(log, vec!["a", "b"]);
        assert_eq!(n, 20);
    }

    #[test]
    fn test_first_result_stops_processing() {
        let mut ward: Ward<(), Vec<u8>, &'static str> = Ward::new("stop");
        ward.add("push", |_, data| {
            data.push(1);
            None
        })
        .add("halt", |_, data| (data.len() == 1).then_some("halted"))
        .add("never", |_, data| {
            data.push(9);
            None
        });

        let mut ctx = ();
        let mut data = Vec::new();
        let halt = ward.process(&mut ctx, &mut data).unwrap();
        assert_eq!(halt.index, 1);
        assert_eq!(halt.name, "halt");
        assert_eq!(halt.result, "halted");
        assert_eq!(halt.data, &vec![1u8]);
    }

    #[test]
    fn test_process_from_resumes() {
        let mut ward: Ward<(), u32, u32> = Ward::new("resume");
        ward.add("one", |_, _| Some(1)).add("two", |_, n| {
            *n += 2;
            None
        });

        let mut ctx = ();
        let mut n = 0;
        let first = ward.process(&mut ctx, &mut n).map(|halt| halt.index).unwrap();
        assert!(ward.process_from(first + 1, &mut ctx, &mut n).is_none());
        assert_eq!(n, 2);
    }

    #[test]
    fn test_anonymous_names_and_display() {
        let mut ward: Ward<(), (), ()> = Ward::new("act");
        ward.add("validate", |_, _| None).add_anon(|_, _| None);
        assert_eq!(ward.tasknames(), vec!["validate", "task1"]);
        assert_eq!(ward.to_string(), "act:[validate,task1]");
        assert_eq!(ward.len(), 2);
    }
}
