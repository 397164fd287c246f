use std::fmt;

/// The framing a collaborator is asked to answer under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Hub: turn a free-text objective into queue items.
    Planner,
    /// Coordinator: turn one queue item into an ordered action set.
    Decomposer,
    /// Executor: produce file content from a description.
    Generator,
}

const ACTION_CONTRACT: &str = "Answer with JSON only, no prose and no markdown. The shape is \
{\"item\": {\"instruction_set\": [{\"operation\": OP, \"action\": ARGS}, ...]}}. \
OP is one of \"navigate\", \"capture\", \"write\", \"generate\". \
For navigate ARGS is the URL string. For capture ARGS is null. \
For write ARGS is {\"content\": TEXT, \"filename\": NAME, \"extension\": EXT}. \
For generate ARGS is {\"description\": TEXT, \"filename\": NAME, \"extension\": EXT}. \
List the actions in the order they must run.";

const PLANNER: &str = "You plan work for a fleet of browser and file automation workers. \
Split the user's objective into independent steps; each step becomes one queue item \
that a separate team can carry out on its own.";

const DECOMPOSER: &str = "You lead a small team of automation workers. \
Break the task you are given into the smallest concrete actions a worker can run \
one at a time, without asking questions.";

const GENERATOR: &str = "You write complete, working file contents from a short description. \
Answer with the file contents only: no explanations and no markdown fences.";

impl Role {
    /// System prompt for this role.
    pub fn framing(&self) -> String {
        match self {
            Role::Planner => format!("{PLANNER} {ACTION_CONTRACT}"),
            Role::Decomposer => format!("{DECOMPOSER} {ACTION_CONTRACT}"),
            Role::Generator => GENERATOR.to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Planner => write!(f, "planner"),
            Role::Decomposer => write!(f, "decomposer"),
            Role::Generator => write!(f, "generator"),
        }
    }
}
