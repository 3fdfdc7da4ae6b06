//! Labels for structured control flow
//!
//! Every active `block`, `loop` and `if` in a frame has a label recording
//! the operand-stack height at entry, how many values a branch to it carries
//! and where such a branch continues. Label 0 is the innermost.

/// Kind of structured construct a label belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Branches leave the block
    Block,
    /// Branches restart the loop
    Loop,
    /// Branches leave the `if` (or its `else` arm)
    If,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub kind: LabelKind,
    /// Values carried by a branch: the block results, or the loop parameters
    pub arity: usize,
    /// Operand-stack height below the construct's parameters
    pub height: usize,
    /// Instruction a branch to this label continues at
    pub continuation: usize,
}

/// Labels of one frame
#[derive(Debug, Default)]
pub struct LabelStack {
    labels: Vec<Label>,
}

impl LabelStack {
    pub fn new() -> Self {
        LabelStack { labels: Vec::new() }
    }

    pub fn push(&mut self, label: Label) {
        self.labels.push(label);
    }

    pub fn pop(&mut self) -> Option<Label> {
        self.labels.pop()
    }

    /// The `depth`-th label from the top (0 = innermost)
    pub fn get(&self, depth: u32) -> Option<&Label> {
        let len = self.labels.len();
        if depth as usize >= len {
            return None;
        }
        self.labels.get(len - 1 - depth as usize)
    }

    /// Drop the innermost `count` labels
    pub fn drop_innermost(&mut self, count: usize) {
        let len = self.labels.len();
        self.labels.truncate(len.saturating_sub(count));
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.labels.len()
    }
}
