// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::ConfigError;

/// A task that panicked instead of returning a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskPanic {
    pub message: String,
}

impl TaskPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast_ref::<&str>() {
                Some(message) => (*message).to_owned(),
                None => String::from("unknown panic"),
            },
        };
        Self { message }
    }
}

/// A fixed number of workers for one stage of a run. At most `workers` tasks run at once, and
/// `run_all` returns only once every task has finished.
pub struct BoundedPool {
    stage: &'static str,
    pool: ThreadPool,
}

impl BoundedPool {
    pub fn new(stage: &'static str, workers: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::ZeroConcurrency { stage });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |index| format!("{}-{}", stage, index))
            .build()
            .map_err(|e| ConfigError::WorkerPool {
                stage,
                workers,
                reason: e.to_string(),
            })?;
        Ok(Self { stage, pool })
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` over every item. Each result lands in the slot of its item, and a task that
    /// panics fills its slot with the panic instead of unwinding through the batch.
    pub fn run_all<T, R, F>(&self, items: Vec<T>, task: F) -> Vec<Result<R, TaskPanic>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        self.pool.install(|| {
            items
                .into_par_iter()
                .map(|item| {
                    panic::catch_unwind(AssertUnwindSafe(|| task(item)))
                        .map_err(TaskPanic::from_payload)
                })
                .collect()
        })
    }
}
