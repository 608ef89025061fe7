use std::{mem, rc::Rc};

use crate::diagnostics::SourceSpan;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// Plain (`op == None`) or compound assignment.
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    ArrayLiteral(Vec<Expr>),
    StructLiteral(Vec<(String, Expr)>),
    Template(Vec<TemplateSegment>),
    Group(Box<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        target: Box<Expr>,
        field: String,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Rc<[Stmt]>,
    },
}

#[derive(Debug, Clone)]
pub enum TemplateSegment {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    /// `for item in xs` or `for index, item in xs`.
    For {
        index: Option<String>,
        binding: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Break,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub items: Vec<Stmt>,
}

// Expressions like `1 + 1 + ...` or `x[0][0]...` nest as deep as the source
// is long. The derived drop glue would recurse once per level, so both node
// types hand their children to an explicit work list instead.

impl Drop for Expr {
    fn drop(&mut self) {
        if matches!(self.kind, ExprKind::Literal(_) | ExprKind::Variable(_)) {
            return;
        }
        let kind = mem::replace(&mut self.kind, ExprKind::Literal(Literal::Null));
        Dismantle(vec![Detached::Expr(kind)]).run();
    }
}

impl Drop for Stmt {
    fn drop(&mut self) {
        if matches!(self.kind, StmtKind::Break | StmtKind::Return(None)) {
            return;
        }
        let kind = mem::replace(&mut self.kind, StmtKind::Break);
        Dismantle(vec![Detached::Stmt(kind)]).run();
    }
}

enum Detached {
    Expr(ExprKind),
    Stmt(StmtKind),
}

/// Pending nodes whose children have not been detached yet. Every node is
/// emptied before it is dropped, so its own drop never descends.
struct Dismantle(Vec<Detached>);

impl Dismantle {
    fn run(mut self) {
        while let Some(node) = self.0.pop() {
            match node {
                Detached::Expr(kind) => self.expr_children(kind),
                Detached::Stmt(kind) => self.stmt_children(kind),
            }
        }
    }

    fn expr(&mut self, mut expr: Expr) {
        let kind = mem::replace(&mut expr.kind, ExprKind::Literal(Literal::Null));
        self.0.push(Detached::Expr(kind));
    }

    fn stmt(&mut self, mut stmt: Stmt) {
        let kind = mem::replace(&mut stmt.kind, StmtKind::Break);
        self.0.push(Detached::Stmt(kind));
    }

    fn stmts(&mut self, stmts: Vec<Stmt>) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn expr_children(&mut self, kind: ExprKind) {
        match kind {
            ExprKind::Literal(_) | ExprKind::Variable(_) => {}
            ExprKind::Binary { left, right, .. }
            | ExprKind::Assign {
                target: left,
                value: right,
                ..
            }
            | ExprKind::Index {
                target: left,
                index: right,
            }
            | ExprKind::Range {
                start: left,
                end: right,
            } => {
                self.expr(*left);
                self.expr(*right);
            }
            ExprKind::Unary { expr, .. }
            | ExprKind::Group(expr)
            | ExprKind::Field { target: expr, .. } => self.expr(*expr),
            ExprKind::Call { callee, args } => {
                self.expr(*callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::ArrayLiteral(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::StructLiteral(fields) => {
                for (_, value) in fields {
                    self.expr(value);
                }
            }
            ExprKind::Template(segments) => {
                for segment in segments {
                    if let TemplateSegment::Expr(expr) = segment {
                        self.expr(expr);
                    }
                }
            }
            // shared with closures created from it; only the last owner detaches
            ExprKind::Lambda { mut body, .. } => {
                if let Some(stmts) = Rc::get_mut(&mut body) {
                    for stmt in stmts.iter_mut() {
                        let kind = mem::replace(&mut stmt.kind, StmtKind::Break);
                        self.0.push(Detached::Stmt(kind));
                    }
                }
            }
        }
    }

    fn stmt_children(&mut self, kind: StmtKind) {
        match kind {
            StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => self.expr(expr),
            StmtKind::Return(None) | StmtKind::Break => {}
            StmtKind::Block(body) => self.stmts(body),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.stmts(then_branch);
                if let Some(branch) = else_branch {
                    self.stmts(branch);
                }
            }
            StmtKind::While { condition, body } => {
                self.expr(condition);
                self.stmts(body);
            }
            StmtKind::For { iterable, body, .. } => {
                self.expr(iterable);
                self.stmts(body);
            }
        }
    }
}
