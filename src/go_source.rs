//! Go-only `Parser` and `GraphExtractor` adapters, built directly on
//! `tree-sitter` + the `tree-sitter-go` grammar.
//!
//! An earlier draft of this module leaned on `tree-sitter-tags`, but the
//! tags crate only yields a flat list of (name, kind, range) tuples with
//! no parent/child linkage — it cannot tell us which parameter list
//! belongs to which function, or which call sites sit inside which
//! function body. The structure tables need exactly that linkage, so
//! both adapters here walk the syntax tree directly instead.

use std::path::Path;
use std::sync::Mutex;

use tree_sitter::Node;
use tree_sitter::Parser as TsParser;
use uuid::Uuid;

use crate::error::IndexError;
use crate::error::Result;
use crate::traits::GraphExtractor;
use crate::traits::ParseExtraction;
use crate::traits::Parser as ParserCapability;
use crate::types::CodeStructure;
use crate::types::FunctionCallRow;
use crate::types::FunctionParameterRow;
use crate::types::FunctionRow;
use crate::types::ImportRow;
use crate::types::TypeFieldRow;
use crate::types::TypeRow;

fn go_language() -> tree_sitter::Language {
    tree_sitter_go::LANGUAGE.into()
}

fn parse_go(source: &str) -> Option<tree_sitter::Tree> {
    let mut parser = TsParser::new();
    parser.set_language(&go_language()).ok()?;
    parser.parse(source, None)
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn child_of_kind<'a>(node: &'a Node, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

fn children_of_kind<'a>(node: &'a Node, kind: &str) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|c| c.kind() == kind)
        .collect()
}

/// A Go-aware `Parser` building chunk candidates for the Processor.
///
/// Only recognizes `.go` files; any other extension yields `Ok(None)`.
pub struct GoParser;

impl ParserCapability for GoParser {
    fn parse(&self, path: &Path) -> Result<Option<ParseExtraction>> {
        if path.extension().and_then(|e| e.to_str()) != Some("go") {
            return Ok(None);
        }
        let source = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
        let tree = match parse_go(&source) {
            Some(t) => t,
            None => {
                return Err(IndexError::ParseFailure {
                    path: path.to_path_buf(),
                    cause: "tree-sitter failed to initialize the Go grammar".to_string(),
                });
            }
        };
        let root = tree.root_node();

        let mut extraction = ParseExtraction::default();
        let mut cursor = root.walk();
        for top in root.children(&mut cursor) {
            match top.kind() {
                "package_clause" => {
                    if let Some(name) = child_of_kind(&top, "package_identifier") {
                        extraction.package_name = Some(node_text(name, &source).to_string());
                    }
                }
                "import_declaration" => {
                    extraction.import_count += count_import_specs(&top);
                }
                "type_declaration" => {
                    for spec in children_of_kind(&top, "type_spec") {
                        let Some(name) = spec.child_by_field_name("name") else {
                            continue;
                        };
                        extraction.types.push(node_text(name, &source).to_string());
                        extraction
                            .type_definitions
                            .push(node_text(spec, &source).to_string());
                    }
                }
                "function_declaration" => {
                    if let Some(name) = top.child_by_field_name("name") {
                        extraction.functions.push(node_text(name, &source).to_string());
                        extraction
                            .function_signatures
                            .push(signature_text(&top, &source));
                    }
                }
                "method_declaration" => {
                    if let Some(name) = top.child_by_field_name("name") {
                        extraction.functions.push(node_text(name, &source).to_string());
                        extraction
                            .function_signatures
                            .push(signature_text(&top, &source));
                    }
                }
                "const_declaration" | "var_declaration" => {
                    extraction.data_blocks.push(node_text(top, &source).to_string());
                }
                _ => {}
            }
        }
        Ok(Some(extraction))
    }
}

fn count_import_specs(decl: &Node) -> usize {
    if let Some(list) = child_of_kind(decl, "import_spec_list") {
        children_of_kind(&list, "import_spec").len()
    } else {
        children_of_kind(decl, "import_spec").len()
    }
}

/// Signature-only text: everything up to (but not including) the body
/// block, trimmed.
fn signature_text(decl: &Node, source: &str) -> String {
    let end = decl
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| decl.end_byte());
    source[decl.start_byte()..end].trim_end().to_string()
}

/// A Go-aware `GraphExtractor` producing the structure tables.
///
/// Wraps a [`TsParser`] behind a `Mutex` since `Parser::parse` takes
/// `&mut self`, while the trait's `extract` is `&self` to match how the
/// GraphUpdater shares one extractor across files.
pub struct GoTagGraphExtractor {
    parser: Mutex<TsParser>,
}

impl GoTagGraphExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = TsParser::new();
        parser
            .set_language(&go_language())
            .map_err(|e| IndexError::ParseFailure {
                path: std::path::PathBuf::new(),
                cause: format!("loading Go grammar: {e}"),
            })?;
        Ok(Self {
            parser: Mutex::new(parser),
        })
    }
}

impl Default for GoTagGraphExtractor {
    fn default() -> Self {
        Self::new().expect("tree-sitter-go grammar must load")
    }
}

impl GraphExtractor for GoTagGraphExtractor {
    fn extract(&self, absolute_path: &Path) -> Result<Option<CodeStructure>> {
        if absolute_path.extension().and_then(|e| e.to_str()) != Some("go") {
            return Ok(None);
        }
        let source = std::fs::read_to_string(absolute_path)
            .map_err(|e| IndexError::io(absolute_path, e))?;
        let rel_path = absolute_path.to_string_lossy().to_string();

        let tree = {
            let mut guard = self.parser.lock().unwrap_or_else(|p| p.into_inner());
            guard.parse(&source, None)
        };
        let tree = tree.ok_or_else(|| IndexError::ParseFailure {
            path: absolute_path.to_path_buf(),
            cause: "tree-sitter failed to parse file".to_string(),
        })?;

        let mut out = CodeStructure::default();
        walk_top_level(tree.root_node(), &source, &rel_path, &mut out);
        Ok(Some(out))
    }
}

fn walk_top_level(root: Node, source: &str, file_path: &str, out: &mut CodeStructure) {
    let mut cursor = root.walk();
    for top in root.children(&mut cursor) {
        match top.kind() {
            "import_declaration" => extract_imports(&top, source, file_path, out),
            "type_declaration" => extract_types(&top, source, file_path, out),
            "function_declaration" => {
                let id = extract_function(&top, source, file_path, None, out);
                if let Some(body) = top.child_by_field_name("body") {
                    walk_calls(body, source, &id, out);
                }
            }
            "method_declaration" => {
                let receiver_type = top
                    .child_by_field_name("receiver")
                    .and_then(|r| receiver_type_name(r, source));
                let id = extract_function(&top, source, file_path, receiver_type, out);
                if let Some(body) = top.child_by_field_name("body") {
                    walk_calls(body, source, &id, out);
                }
            }
            _ => {}
        }
    }
}

fn receiver_type_name(receiver: Node, source: &str) -> Option<String> {
    let decl = child_of_kind(&receiver, "parameter_declaration")?;
    let ty = decl.child_by_field_name("type")?;
    Some(node_text(ty, source).trim_start_matches('*').to_string())
}

fn extract_imports(decl: &Node, source: &str, file_path: &str, out: &mut CodeStructure) {
    let specs = if let Some(list) = child_of_kind(decl, "import_spec_list") {
        children_of_kind(&list, "import_spec")
    } else {
        children_of_kind(decl, "import_spec")
    };
    for spec in specs {
        let Some(path_node) = spec
            .child_by_field_name("path")
            .or_else(|| child_of_kind(&spec, "interpreted_string_literal"))
        else {
            continue;
        };
        let path_text = node_text(path_node, source).trim_matches('"').to_string();
        let alias = spec
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string());
        out.imports.push(ImportRow {
            file_path: file_path.to_string(),
            path: path_text,
            alias,
        });
    }
}

fn extract_types(decl: &Node, source: &str, file_path: &str, out: &mut CodeStructure) {
    for spec in children_of_kind(decl, "type_spec") {
        let Some(name_node) = spec.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name_node, source).to_string();
        let Some(type_node) = spec.child_by_field_name("type") else {
            continue;
        };
        let kind = match type_node.kind() {
            "struct_type" => "struct",
            "interface_type" => "interface",
            _ => "alias",
        };
        let type_id = format!("{file_path}#{name}@{}", spec.start_position().row + 1);
        out.types.push(TypeRow {
            id: type_id.clone(),
            file_path: file_path.to_string(),
            name,
            kind: kind.to_string(),
            start_line: (spec.start_position().row + 1) as i64,
            end_line: (spec.end_position().row + 1) as i64,
        });

        if type_node.kind() == "struct_type" {
            if let Some(fields) = child_of_kind(&type_node, "field_declaration_list") {
                for field in children_of_kind(&fields, "field_declaration") {
                    let field_type = field
                        .child_by_field_name("type")
                        .map(|t| node_text(t, source).to_string())
                        .unwrap_or_default();
                    let names = children_of_kind(&field, "field_identifier");
                    if names.is_empty() {
                        // Embedded field: the type itself is the name.
                        out.type_fields.push(TypeFieldRow {
                            type_id: type_id.clone(),
                            name: field_type.clone(),
                            field_type,
                        });
                    } else {
                        for name in names {
                            out.type_fields.push(TypeFieldRow {
                                type_id: type_id.clone(),
                                name: node_text(name, source).to_string(),
                                field_type: field_type.clone(),
                            });
                        }
                    }
                }
            }
        }
    }
}

fn extract_function(
    decl: &Node,
    source: &str,
    file_path: &str,
    receiver_type: Option<String>,
    out: &mut CodeStructure,
) -> String {
    let name = decl
        .child_by_field_name("name")
        .map(|n| node_text(n, source).to_string())
        .unwrap_or_default();
    let start_line = (decl.start_position().row + 1) as i64;
    let id = format!("{file_path}#{name}@{start_line}");
    out.functions.push(FunctionRow {
        id: id.clone(),
        file_path: file_path.to_string(),
        name,
        receiver_type,
        start_line,
        end_line: (decl.end_position().row + 1) as i64,
    });

    if let Some(params) = decl.child_by_field_name("parameters") {
        let mut position = 0i64;
        for param in children_of_kind(&params, "parameter_declaration") {
            let param_type = param
                .child_by_field_name("type")
                .map(|t| node_text(t, source).to_string())
                .unwrap_or_default();
            let names = children_of_kind(&param, "identifier");
            if names.is_empty() {
                out.function_parameters.push(FunctionParameterRow {
                    function_id: id.clone(),
                    position,
                    name: String::new(),
                    param_type: param_type.clone(),
                });
                position += 1;
            } else {
                for name in names {
                    out.function_parameters.push(FunctionParameterRow {
                        function_id: id.clone(),
                        position,
                        name: node_text(name, source).to_string(),
                        param_type: param_type.clone(),
                    });
                    position += 1;
                }
            }
        }
    }

    id
}

fn walk_calls(node: Node, source: &str, function_id: &str, out: &mut CodeStructure) {
    if node.kind() == "call_expression" {
        if let Some(func) = node.child_by_field_name("function") {
            let callee_name = match func.kind() {
                "selector_expression" => func
                    .child_by_field_name("field")
                    .map(|f| node_text(f, source).to_string()),
                _ => Some(node_text(func, source).to_string()),
            };
            if let Some(callee_name) = callee_name {
                out.function_calls.push(FunctionCallRow {
                    id: Uuid::new_v4().to_string(),
                    function_id: function_id.to_string(),
                    callee_name,
                    line: (node.start_position().row + 1) as i64,
                });
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        // Do not descend into nested function literals' bodies attributing
        // their calls to the outer function — nested func literals are
        // rare in practice and their calls still belong lexically to the
        // enclosing declaration for this core's purposes.
        walk_calls(child, source, function_id, out);
    }
}
