use std::sync::{Arc, Mutex, MutexGuard};

/// Output sink of `corofy/Console.println`. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct Console {
    lines: Arc<Mutex<Vec<String>>>,
    echo: bool,
}

impl Console {
    /// Console that also prints every line to stdout.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn println(&self, line: impl Into<String>) {
        let line = line.into();
        if self.echo {
            println!("{}", line);
        }
        self.buffer().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer().clone()
    }

    /// Remove and return everything printed so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.buffer())
    }
}
