//! Structured reading of `CREATE TABLE` statements.
//!
//! Only what the add-column safety check needs is extracted: per-column
//! constraint flags, the kind of each column default, and the columns named
//! by table-level constraints. Anything the parser is unsure about is an
//! error so the caller can fall back to a rebuild.

use crate::lexer::{LexError, Lexer, Token, TokenKind};

/// Classification of a column's DEFAULT clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultKind {
    /// `DEFAULT NULL`.
    Null,
    /// A literal value: number, string, blob, TRUE/FALSE.
    Constant,
    /// Anything evaluated at insert time (`CURRENT_TIMESTAMP`, `(expr)`, ...).
    Expression,
}

/// Constraint flags of one column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Column name (unquoted).
    pub name: String,
    /// Inline `PRIMARY KEY`.
    pub primary_key: bool,
    /// Inline `UNIQUE`.
    pub unique: bool,
    /// Inline `REFERENCES` (foreign key).
    pub references: bool,
    /// `GENERATED ALWAYS AS (...)` or `AS (...)`.
    pub generated: bool,
    /// Inline `COLLATE name`.
    pub collate: bool,
    /// Inline `CHECK (...)`.
    pub check: bool,
    /// Inline `NOT NULL`.
    pub not_null: bool,
    /// DEFAULT clause, if any.
    pub default: Option<DefaultKind>,
}

impl ColumnDefinition {
    fn new(name: String) -> Self {
        Self {
            name,
            primary_key: false,
            unique: false,
            references: false,
            generated: false,
            collate: false,
            check: false,
            not_null: false,
            default: None,
        }
    }
}

/// Kind of a table-level constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableConstraintKind {
    /// `PRIMARY KEY (...)`.
    PrimaryKey,
    /// `UNIQUE (...)`.
    Unique,
    /// `FOREIGN KEY (...) REFERENCES ...`.
    ForeignKey,
    /// `CHECK (...)`.
    Check,
}

impl TableConstraintKind {
    /// SQL keyword(s) for this constraint.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::Unique => "UNIQUE",
            Self::ForeignKey => "FOREIGN KEY",
            Self::Check => "CHECK",
        }
    }
}

/// A table-level constraint and the columns it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConstraint {
    /// Constraint kind.
    pub kind: TableConstraintKind,
    /// Columns named by the constraint (empty for CHECK).
    pub columns: Vec<String>,
}

/// Reasons a statement could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Tokenizer failure.
    #[error(transparent)]
    Lex(#[from] LexError),
    /// Not a `CREATE TABLE` statement.
    #[error("not a CREATE TABLE statement")]
    NotCreateTable,
    /// `CREATE VIRTUAL TABLE` bodies are module arguments, not columns.
    #[error("virtual tables are not supported")]
    VirtualTable,
    /// `CREATE TABLE ... AS SELECT` has no column definitions.
    #[error("CREATE TABLE ... AS SELECT has no column definitions")]
    AsSelect,
    /// No parenthesised body, or it was never closed.
    #[error("unbalanced or missing column list")]
    Unbalanced,
    /// Two commas in a row, or a trailing comma.
    #[error("empty element in column list")]
    EmptyElement,
    /// A token the parser cannot place.
    #[error("unexpected token `{0}`")]
    Unexpected(String),
}

/// Column definitions and table constraints of one `CREATE TABLE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTableDefinition {
    /// Column definitions in order.
    pub columns: Vec<ColumnDefinition>,
    /// Table-level constraints in order.
    pub constraints: Vec<TableConstraint>,
}

impl CreateTableDefinition {
    /// Parses a `CREATE TABLE` statement.
    pub fn parse(sql: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(sql).tokenize()?;
        let body = table_body(&tokens)?;

        let mut definition = Self::default();
        for element in split_top_level(body)? {
            if let Some(constraint) = parse_table_constraint(element)? {
                definition.constraints.push(constraint);
            } else {
                definition.columns.push(parse_column(element)?);
            }
        }
        Ok(definition)
    }

    /// Finds a column definition by name (ASCII case-insensitive, as SQLite
    /// compares identifiers).
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns table constraints that name the column.
    pub fn constraints_on<'a>(
        &'a self,
        column: &'a str,
    ) -> impl Iterator<Item = &'a TableConstraint> + 'a {
        self.constraints.iter().filter(move |constraint| {
            constraint
                .columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(column))
        })
    }
}

fn describe(token: &Token) -> String {
    match &token.kind {
        TokenKind::Word(s) | TokenKind::QuotedIdent(s) | TokenKind::Number(s) => s.clone(),
        TokenKind::String(s) => format!("'{s}'"),
        TokenKind::Blob(s) => format!("x'{s}'"),
        TokenKind::Symbol(c) => c.to_string(),
    }
}

/// Returns the tokens between the outer parentheses of the column list.
fn table_body(tokens: &[Token]) -> Result<&[Token], ParseError> {
    let mut i = 0;
    let at = |i: usize, kw: &str| tokens.get(i).is_some_and(|t| t.is_keyword(kw));

    if !at(i, "CREATE") {
        return Err(ParseError::NotCreateTable);
    }
    i += 1;
    if at(i, "TEMP") || at(i, "TEMPORARY") {
        i += 1;
    }
    if at(i, "VIRTUAL") {
        return Err(ParseError::VirtualTable);
    }
    if !at(i, "TABLE") {
        return Err(ParseError::NotCreateTable);
    }
    i += 1;
    if at(i, "IF") {
        if !(at(i + 1, "NOT") && at(i + 2, "EXISTS")) {
            return Err(ParseError::NotCreateTable);
        }
        i += 3;
    }

    // [schema .] name
    if tokens.get(i).and_then(Token::identifier).is_none() {
        return Err(ParseError::NotCreateTable);
    }
    i += 1;
    if tokens.get(i).is_some_and(|t| t.is_symbol('.')) {
        if tokens.get(i + 1).and_then(Token::identifier).is_none() {
            return Err(ParseError::NotCreateTable);
        }
        i += 2;
    }

    if at(i, "AS") {
        return Err(ParseError::AsSelect);
    }
    if !tokens.get(i).is_some_and(|t| t.is_symbol('(')) {
        return Err(ParseError::Unbalanced);
    }
    let open = i;
    let close = matching_paren(tokens, open).ok_or(ParseError::Unbalanced)?;
    Ok(&tokens[open + 1..close])
}

/// Index of the `)` that closes the `(` at `open`.
fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Splits tokens at commas outside any parentheses.
fn split_top_level(tokens: &[Token]) -> Result<Vec<&[Token]>, ParseError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            depth = depth.checked_sub(1).ok_or(ParseError::Unbalanced)?;
        } else if token.is_symbol(',') && depth == 0 {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if depth != 0 {
        return Err(ParseError::Unbalanced);
    }
    parts.push(&tokens[start..]);

    if parts.iter().any(|p| p.is_empty()) {
        return Err(ParseError::EmptyElement);
    }
    Ok(parts)
}

fn parse_table_constraint(element: &[Token]) -> Result<Option<TableConstraint>, ParseError> {
    let mut i = 0;
    if element[0].is_keyword("CONSTRAINT") {
        if element.get(1).and_then(Token::identifier).is_none() {
            return Err(ParseError::Unexpected(
                element.get(1).map_or_else(String::new, describe),
            ));
        }
        i = 2;
    }
    let Some(head) = element.get(i) else {
        return Err(ParseError::EmptyElement);
    };

    let kind = if head.is_keyword("PRIMARY") {
        TableConstraintKind::PrimaryKey
    } else if head.is_keyword("UNIQUE") {
        TableConstraintKind::Unique
    } else if head.is_keyword("FOREIGN") {
        TableConstraintKind::ForeignKey
    } else if head.is_keyword("CHECK") {
        TableConstraintKind::Check
    } else if i > 0 {
        return Err(ParseError::Unexpected(describe(head)));
    } else {
        return Ok(None);
    };

    if kind == TableConstraintKind::Check {
        return Ok(Some(TableConstraint {
            kind,
            columns: Vec::new(),
        }));
    }

    let open = element
        .iter()
        .position(|t| t.is_symbol('('))
        .ok_or(ParseError::Unbalanced)?;
    let close = matching_paren(element, open).ok_or(ParseError::Unbalanced)?;

    let mut columns = Vec::new();
    for item in split_top_level(&element[open + 1..close])? {
        // indexed-column: name [COLLATE x] [ASC|DESC]; expressions are not
        // something we can attribute to a column.
        let name = item[0]
            .identifier()
            .filter(|_| !matches!(item.get(1), Some(t) if t.is_symbol('(')))
            .ok_or_else(|| ParseError::Unexpected(describe(&item[0])))?;
        columns.push(name.to_string());
    }

    Ok(Some(TableConstraint { kind, columns }))
}

fn parse_column(element: &[Token]) -> Result<ColumnDefinition, ParseError> {
    let name = element[0]
        .identifier()
        .ok_or_else(|| ParseError::Unexpected(describe(&element[0])))?;
    let mut column = ColumnDefinition::new(name.to_string());

    let mut i = 1;
    let mut previous_was_set = false;
    while let Some(token) = element.get(i) {
        if token.is_symbol('(') {
            // Type arguments, CHECK bodies, REFERENCES column lists.
            i = matching_paren(element, i).ok_or(ParseError::Unbalanced)? + 1;
            previous_was_set = false;
            continue;
        }

        if token.is_keyword("PRIMARY") {
            column.primary_key = true;
        } else if token.is_keyword("UNIQUE") {
            column.unique = true;
        } else if token.is_keyword("REFERENCES") {
            column.references = true;
        } else if token.is_keyword("GENERATED") || token.is_keyword("AS") {
            column.generated = true;
        } else if token.is_keyword("COLLATE") {
            column.collate = true;
        } else if token.is_keyword("CHECK") {
            column.check = true;
        } else if token.is_keyword("NOT") && element.get(i + 1).is_some_and(|t| t.is_keyword("NULL"))
        {
            column.not_null = true;
            i += 1;
        } else if token.is_keyword("DEFAULT") && !previous_was_set {
            let (kind, consumed) = parse_default(&element[i + 1..])?;
            column.default = Some(kind);
            i += consumed;
        }

        previous_was_set = token.is_keyword("SET");
        i += 1;
    }

    Ok(column)
}

/// Classifies the expression following DEFAULT. Returns the kind and the
/// number of tokens it spans.
fn parse_default(rest: &[Token]) -> Result<(DefaultKind, usize), ParseError> {
    let Some(first) = rest.first() else {
        return Err(ParseError::Unexpected("DEFAULT".to_string()));
    };

    let kind = match &first.kind {
        TokenKind::Symbol('(') => {
            let close = matching_paren(rest, 0).ok_or(ParseError::Unbalanced)?;
            return Ok((DefaultKind::Expression, close + 1));
        }
        TokenKind::Symbol('+' | '-') => {
            return match rest.get(1).map(|t| &t.kind) {
                Some(TokenKind::Number(_)) => Ok((DefaultKind::Constant, 2)),
                _ => Ok((DefaultKind::Expression, 1)),
            };
        }
        TokenKind::Number(_) | TokenKind::String(_) | TokenKind::Blob(_) => DefaultKind::Constant,
        TokenKind::Word(w) if w.eq_ignore_ascii_case("NULL") => DefaultKind::Null,
        TokenKind::Word(w) if w.eq_ignore_ascii_case("TRUE") || w.eq_ignore_ascii_case("FALSE") => {
            DefaultKind::Constant
        }
        _ => DefaultKind::Expression,
    };
    Ok((kind, 1))
}
