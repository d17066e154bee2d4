use std::io::Write;

use resultstore::{Group, Table};

enum Statement<'a> {
    Open(&'a str),
    Archive(&'a str),
    Tables,
    Show(Option<&'a str>),
    Attributes(Option<&'a str>),
    Help,
    Unknown,
}

fn parse(line: &str) -> Statement<'_> {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((c, a)) => (c, Some(a.trim()).filter(|a| !a.is_empty())),
        None => (line, None),
    };
    match (command, arg) {
        ("open", Some(path)) => Statement::Open(path),
        ("archive", Some(path)) => Statement::Archive(path),
        ("tables", None) => Statement::Tables,
        ("show", arg) => Statement::Show(arg),
        ("attributes", arg) => Statement::Attributes(arg),
        ("help", _) => Statement::Help,
        _ => Statement::Unknown,
    }
}

#[derive(Default)]
struct Session {
    table: Option<Table>,
    group: Option<Group>,
}

impl Session {
    /// The opened table, or a table in the opened archive.
    fn pick(&self, path: Option<&str>) -> Result<&Table, String> {
        match (path, &self.table, &self.group) {
            (Some(path), _, Some(group)) => group.table(path).map_err(|e| e.to_string()),
            (Some(_), _, None) => Err("no archive is open.".to_string()),
            (None, Some(table), _) => Ok(table),
            (None, None, _) => Err("no table is open.".to_string()),
        }
    }

    fn run(&mut self, statement: Statement) -> Result<(), String> {
        match statement {
            Statement::Open(path) => {
                let table = Table::load_file(path).map_err(|e| e.to_string())?;
                println!(
                    "{} columns, {} rows.",
                    table.column_count(),
                    table.row_count()
                );
                self.table = Some(table);
            }
            Statement::Archive(path) => {
                let group = Group::load_archive(path).map_err(|e| e.to_string())?;
                println!("{} tables.", group.all_tables().len());
                self.group = Some(group);
            }
            Statement::Tables => {
                let group = self.group.as_ref().ok_or("no archive is open.")?;
                for (path, table) in group.all_tables() {
                    println!("{path}: {} rows", table.row_count());
                }
            }
            Statement::Show(path) => {
                let table = self.pick(path)?;
                table
                    .render_ascii(std::io::stdout().lock())
                    .map_err(|e| e.to_string())?;
            }
            Statement::Attributes(path) => {
                for (key, value) in self.pick(path)?.attributes() {
                    println!("{key} = {value}");
                }
            }
            Statement::Help => {
                println!("open <file>         load a csv or binary table");
                println!("archive <file>      load a tar.gz archive of tables");
                println!("tables              list the tables in the archive");
                println!("show [path]         print a table");
                println!("attributes [path]   print a table's attributes");
                println!("exit                leave");
            }
            Statement::Unknown => println!("unrecognized statement."),
        }
        Ok(())
    }
}

fn main() -> Result<(), std::io::Error> {
    println!("welcome to resultstore client.");

    let mut session = Session::default();
    for path in std::env::args().skip(1) {
        if let Err(e) = session.run(Statement::Open(&path)) {
            println!("error: {e}");
        }
    }

    loop {
        print!("resultstore > ");
        std::io::stdout().flush()?;
        let mut buffer = String::new();
        if std::io::stdin().read_line(&mut buffer)? == 0 {
            break;
        }
        let b = buffer.trim();

        if "exit".eq(b) || "quit".eq(b) {
            break;
        }
        if b.is_empty() {
            continue;
        }

        if let Err(e) = session.run(parse(b)) {
            println!("error: {e}");
        }
    }

    println!("bye.");
    Ok(())
}

#[test]
fn statements() {
    assert!(matches!(parse("open data.csv"), Statement::Open("data.csv")));
    assert!(matches!(parse("show"), Statement::Show(None)));
    assert!(matches!(parse("show  a/b "), Statement::Show(Some("a/b"))));
    assert!(matches!(parse("tables now"), Statement::Unknown));
    assert!(matches!(parse("open"), Statement::Unknown));
}

#[test]
fn open_and_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.csv");
    std::fs::write(&path, "x [m]\n1.0\n").unwrap();
    let mut session = Session::default();
    session.run(Statement::Open(path.to_str().unwrap())).unwrap();
    assert_eq!(session.pick(None).unwrap().row_count(), 1);
    assert!(session.pick(Some("a")).is_err());
}
