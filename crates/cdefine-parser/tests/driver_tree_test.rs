//! Integration tests over a realistic firmware source tree
//!
//! Builds the define database of a small board-support package and checks
//! the answers an editor host would ask for.

use std::fs;
use std::path::Path;

use cdefine_core::Config;
use cdefine_parser::preprocessor::{HeaderGraph, LineKind};
use cdefine_parser::{DefineDatabase, DefinitionTable, UndefinedPolicy};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const BOARD_H: &str = r#"/*
 * Board description
 */
#ifndef BOARD_H
#define BOARD_H

#include "soc/clock.h"
#include "hal/uart.h"

#define BOARD_REV           3
#define LED_COUNT           (BOARD_REV >= 2 ? 4 : 2)

#if BOARD_REV >= 3
#define HAS_USB             1
#else
#define HAS_USB             0
#endif

#endif /* BOARD_H */
"#;

const CLOCK_H: &str = r#"#ifndef CLOCK_H
#define CLOCK_H

#define MHZ(x)              ((x) * 1000000UL)
#define SYSCLK_HZ           MHZ(48)
#define APB_DIV             2
#define APB_HZ              (SYSCLK_HZ / APB_DIV)

#endif
"#;

const UART_H: &str = r#"#ifndef UART_H
#define UART_H

#include "soc/clock.h"

#define UART_BAUD           115200
#define UART_DIV            (APB_HZ / (16 * UART_BAUD))   // integer divider
#define UART_FIFO_DEPTH \
        (16 << 1)

#ifdef UART_DEBUG
#define UART_TRACE          1
#endif

#undef  APB_DIV
#define APB_DIV             1

#endif
"#;

const MAIN_C: &str = r#"#include "board.h"

#define LOCAL_TIMEOUT 100

int main(void)
{
#if HAS_USB
    usb_init();
#endif
#ifdef UART_TRACE
    trace_enable();
#else
    /* tracing off */
    trace_disable();
#endif
    return 0;
}
"#;

fn firmware_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let files = [
        ("board/board.h", BOARD_H),
        ("soc/clock.h", CLOCK_H),
        ("hal/uart.h", UART_H),
        ("app/main.c", MAIN_C),
    ];
    for (name, content) in files {
        let path = temp.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    temp
}

fn database(root: &Path) -> DefineDatabase {
    let mut db = DefineDatabase::new(Config::for_root(root));
    db.build().unwrap();
    db
}

#[test]
fn test_build_collects_all_headers() {
    let temp = firmware_tree();
    let db = database(temp.path());

    for name in ["BOARD_H", "CLOCK_H", "UART_H", "BOARD_REV", "HAS_USB", "UART_FIFO_DEPTH"] {
        assert!(db.table().contains(name), "{} missing", name);
    }
    assert!(!db.table().contains("UART_TRACE"));
    assert_eq!(db.table().get("HAS_USB").unwrap().token, "1");
    assert_eq!(db.table().get("UART_FIFO_DEPTH").unwrap().token, "(16 << 1)");

    let location = db.table().get("UART_FIFO_DEPTH").unwrap().location.clone().unwrap();
    assert!(location.file.ends_with("uart.h"));
    assert_eq!((location.line, location.end_line), (8, 9));
}

#[test]
fn test_values_through_nested_macros() {
    let temp = firmware_tree();
    let db = database(temp.path());

    assert_eq!(db.evaluate("SYSCLK_HZ"), Some(48_000_000));
    // uart.h redefines APB_DIV after clock.h
    assert_eq!(db.evaluate("APB_HZ"), Some(48_000_000));
    assert_eq!(db.evaluate("UART_DIV"), Some(26));
    assert_eq!(db.evaluate("UART_FIFO_DEPTH"), Some(32));
    assert_eq!(db.evaluate("LED_COUNT"), None);
    assert_eq!(db.format_value("UART_BAUD").unwrap(), "115200 (0x1c200)");
}

#[test]
fn test_strict_and_lenient_expansion() {
    let temp = firmware_tree();
    let db = database(temp.path());

    assert!(db.expand("UART_DIV + UNKNOWN", UndefinedPolicy::Raise).is_err());
    assert_eq!(db.expand("HAS_USB && UNKNOWN", UndefinedPolicy::Zero).unwrap(), "1 && 0");
    assert_eq!(db.expand("MHZ", UndefinedPolicy::Raise).unwrap(), "MHZ");
}

#[test]
fn test_source_file_activity() {
    let temp = firmware_tree();
    let db = database(temp.path());
    let main_c = temp.path().join("app/main.c");

    let activity = db.classify_file(&main_c).unwrap();
    // A line holding only a closed comment stays active
    assert_eq!(activity.inactive.iter().copied().collect::<Vec<_>>(), vec![11]);

    let source = db.preprocess_source(&main_c).unwrap();
    assert!(source.contains(&"    usb_init();".to_string()));
    assert!(source.contains(&"    trace_disable();".to_string()));
    assert!(!source.contains(&"    trace_enable();".to_string()));
}

#[test]
fn test_file_scope_and_defines_listing() {
    let temp = firmware_tree();
    let mut db = database(temp.path());
    let main_c = temp.path().join("app/main.c");

    {
        let scope = db.file_scope(&main_c).unwrap();
        assert_eq!(scope.get("LOCAL_TIMEOUT").unwrap().token, "100");
    }
    assert!(!db.table().contains("LOCAL_TIMEOUT"));

    let defines = db
        .expand_defines_in_file(&temp.path().join("soc/clock.h"))
        .unwrap();
    let names: Vec<_> = defines.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["CLOCK_H", "MHZ", "SYSCLK_HZ", "APB_DIV", "APB_HZ"]);
    assert_eq!(db.table().get("SYSCLK_HZ").unwrap().token, "48000000");
}

#[test]
fn test_predefined_debug_flag() {
    let temp = firmware_tree();
    let mut db = DefineDatabase::new(Config::for_root(temp.path()));
    db.insert_define("UART_DEBUG", None, "1");
    db.build().unwrap();

    assert!(db.table().contains("UART_TRACE"));
    let activity = db.classify_file(&temp.path().join("app/main.c")).unwrap();
    assert_eq!(activity.inactive.iter().copied().collect::<Vec<_>>(), vec![13, 14]);
}

#[test]
fn test_header_graph_directly() {
    let temp = firmware_tree();
    let mut graph = HeaderGraph::discover(temp.path(), &Default::default()).unwrap();
    assert_eq!(graph.headers().len(), 3);

    let mut table = DefinitionTable::new();
    let stats = graph.build(&mut table).unwrap();
    assert_eq!(stats.visited, 3);
    assert_eq!(stats.unresolved_includes, 0);

    let directives = cdefine_parser::preprocessor::read_lines(BOARD_H, Default::default(), &table)
        .filter(|l| l.kind == LineKind::Directive)
        .count();
    assert_eq!(directives, 5);
}
