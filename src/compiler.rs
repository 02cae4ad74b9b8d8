//! Compiler - Instruction Sequence to Executable Template
//!
//! Lowering parses every tag body into expressions, binds filter names
//! against the registry snapshot and folds the flat code tags into a tree
//! of blocks. The result is immutable and can be rendered any number of
//! times.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Result, TemplateError};
use crate::escape::{escape_html, Escaper};
use crate::expr::{self, Expr, Statement};
use crate::filters::{Filter, FilterRegistry};
use crate::runtime;
use crate::syntax::{self, Instruction, ParseOptions, Source};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static COMPILE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_compile_call_count() -> u32 {
    COMPILE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_compile_call_count() {
    COMPILE_CALL_COUNT.store(0, Ordering::SeqCst);
}

pub struct CompileOptions<'a> {
    pub syntax: ParseOptions<'a>,
    pub filters: &'a FilterRegistry,
    pub escape: Escaper,
    /// Rewrite runtime errors with a source context window.
    pub compile_debug: bool,
    /// Log the lowered program.
    pub debug: bool,
}

impl<'a> CompileOptions<'a> {
    pub fn new(syntax: ParseOptions<'a>, filters: &'a FilterRegistry) -> Self {
        Self {
            syntax,
            filters,
            escape: escape_html,
            compile_debug: true,
            debug: false,
        }
    }
}

#[derive(Clone)]
pub(crate) struct BoundFilter {
    pub name: String,
    pub filter: Filter,
    pub args: Vec<Expr>,
}

impl fmt::Debug for BoundFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFilter")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Branch {
    pub cond: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Output {
        expr: Expr,
        filters: Vec<BoundFilter>,
        escape: bool,
        line: usize,
    },
    If {
        branches: Vec<Branch>,
        otherwise: Vec<Node>,
        line: usize,
    },
    For {
        binding: String,
        index: Option<String>,
        iterable: Expr,
        body: Vec<Node>,
        line: usize,
    },
    Let {
        name: String,
        expr: Expr,
        line: usize,
    },
    Eval {
        expr: Expr,
        line: usize,
    },
    Include {
        body: Vec<Node>,
        source: Arc<Source>,
    },
}

/// A compiled template. Shared by every render of the same cache key.
pub struct CompiledTemplate {
    pub(crate) nodes: Vec<Node>,
    pub(crate) source: Arc<Source>,
    pub(crate) escape: Escaper,
    pub(crate) bind_locals: bool,
    pub(crate) compile_debug: bool,
}

impl CompiledTemplate {
    pub async fn render(&self, context: &Context) -> Result<String> {
        runtime::execute(self, context).await
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn filename(&self) -> Option<&str> {
        self.source.filename.as_deref()
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("filename", &self.source.filename)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

pub fn compile(text: &str, options: &CompileOptions<'_>) -> Result<CompiledTemplate> {
    #[cfg(feature = "test-hooks")]
    COMPILE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    let filename = options.syntax.filename;
    let in_file = |err: TemplateError| match err {
        TemplateError::Syntax(_) => TemplateError::compile(err, filename),
        other => other,
    };

    let instructions = syntax::parse(text, &options.syntax).map_err(in_file)?;
    let nodes = lower(instructions, options.filters).map_err(in_file)?;

    tracing::debug!(filename, nodes = nodes.len(), "compiled template");
    if options.debug {
        tracing::trace!(filename, program = ?nodes, "lowered program");
    }

    Ok(CompiledTemplate {
        nodes,
        source: Arc::new(Source::new(text, filename)),
        escape: options.escape,
        bind_locals: options.syntax.bind_locals,
        compile_debug: options.compile_debug,
    })
}

enum Block {
    If {
        branches: Vec<Branch>,
        /// Condition of the branch being filled; `None` once `else` is seen.
        pending: Option<Expr>,
        line: usize,
    },
    For {
        binding: String,
        index: Option<String>,
        iterable: Expr,
        line: usize,
    },
}

struct Frame {
    block: Block,
    nodes: Vec<Node>,
}

impl Frame {
    fn new(block: Block) -> Self {
        Self { block, nodes: Vec::new() }
    }

    fn opened_on(&self) -> usize {
        match self.block {
            Block::If { line, .. } | Block::For { line, .. } => line,
        }
    }

    fn into_node(self) -> Node {
        match self.block {
            Block::If {
                mut branches,
                pending,
                line,
            } => {
                let otherwise = match pending {
                    Some(cond) => {
                        branches.push(Branch { cond, body: self.nodes });
                        Vec::new()
                    }
                    None => self.nodes,
                };
                Node::If { branches, otherwise, line }
            }
            Block::For {
                binding,
                index,
                iterable,
                line,
            } => Node::For {
                binding,
                index,
                iterable,
                body: self.nodes,
                line,
            },
        }
    }
}

/// Folds flat instructions into nested blocks.
#[derive(Default)]
struct Lowering {
    root: Vec<Node>,
    open: Vec<Frame>,
}

impl Lowering {
    fn push(&mut self, node: Node) {
        match self.open.last_mut() {
            Some(frame) => frame.nodes.push(node),
            None => self.root.push(node),
        }
    }

    fn statement(&mut self, statement: Statement, line: usize) -> Result<()> {
        match statement {
            Statement::Empty => {}
            Statement::Let(name, expr) => self.push(Node::Let { name, expr, line }),
            Statement::Eval(expr) => self.push(Node::Eval { expr, line }),
            Statement::If(cond) => self.open.push(Frame::new(Block::If {
                branches: Vec::new(),
                pending: Some(cond),
                line,
            })),
            Statement::For {
                binding,
                index,
                iterable,
            } => self.open.push(Frame::new(Block::For {
                binding,
                index,
                iterable,
                line,
            })),
            Statement::ElseIf(_) | Statement::Else => {
                let Some(Frame {
                    block: Block::If { branches, pending, .. },
                    nodes,
                }) = self.open.last_mut()
                else {
                    return Err(TemplateError::syntax(format!("Unexpected `else` on line {}", line)));
                };
                let Some(cond) = pending.take() else {
                    return Err(TemplateError::syntax(format!(
                        "Unexpected `else` after `else` on line {}",
                        line
                    )));
                };
                branches.push(Branch {
                    cond,
                    body: std::mem::take(nodes),
                });
                if let Statement::ElseIf(next) = statement {
                    *pending = Some(next);
                }
            }
            Statement::End => {
                let frame = self.open.pop().ok_or_else(|| {
                    TemplateError::syntax(format!("Unexpected `}}` on line {}", line))
                })?;
                self.push(frame.into_node());
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<Node>> {
        match self.open.last() {
            Some(frame) => Err(TemplateError::syntax(format!(
                "Unclosed block opened on line {}",
                frame.opened_on()
            ))),
            None => Ok(self.root),
        }
    }
}

fn on_line(line: usize) -> impl Fn(TemplateError) -> TemplateError {
    move |err| match err {
        TemplateError::Syntax(message) => TemplateError::Syntax(format!("{} on line {}", message, line)),
        other => other,
    }
}

fn lower(instructions: Vec<Instruction>, filters: &FilterRegistry) -> Result<Vec<Node>> {
    let mut lowering = Lowering::default();

    for instruction in instructions {
        match instruction {
            Instruction::Literal(text) => lowering.push(Node::Text(text)),
            Instruction::Output {
                expr,
                filters: chain,
                escape,
                line,
            } => {
                let expr = expr::parse_expression(&expr).map_err(on_line(line))?;
                let bound = chain
                    .into_iter()
                    .map(|call| {
                        let filter = filters.get(&call.name).cloned().ok_or_else(|| {
                            TemplateError::syntax(format!(
                                "Unknown filter \"{}\" on line {}",
                                call.name, line
                            ))
                        })?;
                        let args = expr::parse_arguments(&call.args).map_err(on_line(line))?;
                        Ok(BoundFilter {
                            name: call.name,
                            filter,
                            args,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                lowering.push(Node::Output {
                    expr,
                    filters: bound,
                    escape,
                    line,
                });
            }
            Instruction::Code { code, line } => {
                let statement = expr::parse_statement(&code).map_err(on_line(line))?;
                lowering.statement(statement, line)?;
            }
            Instruction::Include {
                instructions,
                source,
                line,
            } => {
                let body = lower(instructions, filters).map_err(|err| match err {
                    TemplateError::Syntax(message) => TemplateError::Syntax(format!(
                        "{} in {} (included on line {})",
                        message,
                        source.filename.as_deref().unwrap_or("include"),
                        line
                    )),
                    other => other,
                })?;
                lowering.push(Node::Include { body, source });
            }
        }
    }

    lowering.finish()
}
