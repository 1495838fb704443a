//! Prompt templates used by the CLI workflows. `{field}` placeholders are
//! filled from each step's input object.

pub const OUTLINE: &str = "Write a 5-bullet outline for an article on {topic}.";
pub const VALIDATE_OUTLINE: &str =
    "Does this outline cover key points? Answer YES/NO and list missing topics:\n{outline}";
pub const DRAFT_ARTICLE: &str = "Write the full article based on this outline:\n{outline}";

pub const ROUTED_ANSWER: &str = "{query}";

pub const SUMMARIZE_PARAGRAPH: &str = "{input}\n\nGive a one-sentence summary of this paragraph:";

pub const PLANNER_SYSTEM: &str = "You are a task planner. Break down complex goals into specific, \
actionable tasks. Return only the tasks as a numbered list, one per line.";
pub const PLANNER_USER: &str = "Goal: {goal}\n\nBreak this into 3-5 specific tasks:";
pub const WORKER_SYSTEM: &str =
    "You are a task executor. Execute the given task and provide a concise, helpful result.";
pub const WORKER_USER: &str = "Task: {task}";

pub const DRAFT_SYSTEM: &str =
    "You are an expert science communicator. Create clear, accurate, and engaging explanations.";
pub const DRAFT_USER: &str = "Explain {topic} in approximately {word_count} words. Make it \
accessible but scientifically accurate.";

pub const CRITIQUE_SYSTEM: &str = "You are a rigorous content critic and editor. Evaluate the \
given content and provide structured feedback.

Focus on:
- Scientific accuracy
- Clarity and accessibility
- Engagement and flow
- Completeness of explanation

Be constructive but thorough in your critique.";
pub const CRITIQUE_USER: &str = "Please critique this content:\n\n{content}";

pub const IMPROVE_SYSTEM: &str = "You are an expert content improver. Take the original content \
and the critique, then create an improved version.

Apply the specific suggestions while maintaining the core message and approximate length.";
pub const IMPROVE_USER: &str = "Original content:
{original_content}

Critique and suggestions:
{critique}

Please provide an improved version that addresses the critique.";

pub const PANEL_SYSTEM: &str = "You are a panel of three experts evaluating content:
1. A scientific accuracy expert
2. A readability and accessibility expert
3. An engagement and communication expert

Provide separate evaluations from each perspective.";
pub const PANEL_USER: &str =
    "Please evaluate this content from all three expert perspectives:\n\n{content}";

/// Sample input for `flowline parallel` when no file is given.
pub const SAMPLE_ARTICLE: &str = "Quantum physics, also known as quantum mechanics, is a \
fundamental theory in physics that describes the behavior of matter and energy at the atomic and \
subatomic scales. Unlike classical physics, quantum mechanics reveals that particles can exist in \
multiple states simultaneously through superposition.

The Heisenberg Uncertainty Principle states that we cannot simultaneously know both the exact \
position and momentum of a particle with arbitrary precision. This is not due to limitations in \
measurement equipment, but rather a fundamental property of quantum systems.

Quantum tunneling occurs when particles pass through energy barriers that they classically \
shouldn't be able to overcome. This phenomenon is essential for nuclear fusion in stars and is \
utilized in various technologies like scanning tunneling microscopes.";
