use std::collections::HashMap;
use std::path::Path;

use rand::Rng;
use resultstore::{Backend, Column, Error, Table, Value};

fn columns() -> Vec<Column> {
    vec![
        Column::float("Time").with_units("s"),
        Column::int("Step"),
        Column::long("Ticks").with_units("ns"),
        Column::boolean("Stable"),
        Column::text("Note"),
    ]
}

fn random_values(rng: &mut impl Rng, i: usize) -> Vec<Value> {
    let note: String = (0..rng.gen_range(0..12))
        .map(|_| *b"ab, \"\\x".get(rng.gen_range(0..8)).unwrap_or(&b'z') as char)
        .collect();
    vec![
        Value::Float64(rng.gen_range(-1e6..1e6)),
        Value::Int32(i as i32),
        Value::Int64(rng.gen()),
        Value::Bool(rng.gen()),
        Value::Text(note),
    ]
}

/// One table of each backend, holding the same rows.
fn backends(dir: &Path, rows: usize) -> Vec<Table> {
    let tables = vec![
        Table::new(columns()).unwrap(),
        Table::text_stream(dir.join("rows.csv"), columns()).unwrap(),
        Table::binary_stream(dir.join("rows.jdf"), columns()).unwrap(),
    ];
    let mut rng = rand::thread_rng();
    for i in 0..rows {
        let values = random_values(&mut rng, i);
        for table in tables.iter() {
            table.add_values(values.clone()).unwrap();
        }
    }
    tables
}

fn assert_same(a: &Table, b: &Table) {
    assert_eq!(a.schema(), b.schema());
    assert_eq!(a.attributes(), b.attributes());
    assert_eq!(a.row_count(), b.row_count());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.unwrap().values(), y.unwrap().values());
    }
}

#[test]
fn row_counts() {
    for n in [0, 1, 1000] {
        let dir = tempfile::tempdir().unwrap();
        for table in backends(dir.path(), n) {
            assert_eq!(table.row_count(), n, "{:?}", table.backend());
            assert_eq!(table.iter().count(), n);
        }
    }
}

#[test]
fn backends_agree() {
    let dir = tempfile::tempdir().unwrap();
    let tables = backends(dir.path(), 200);
    assert_eq!(
        tables.iter().map(|t| t.backend()).collect::<Vec<_>>(),
        vec![Backend::Memory, Backend::Text, Backend::Binary]
    );
    for i in [0, 1, 117, 199, 3, 0] {
        let expected = tables[0].get_row(i).unwrap();
        for table in &tables[1..] {
            assert_eq!(table.get_row(i).unwrap().values(), expected.values());
        }
    }
    assert_same(&tables[0], &tables[1]);
    assert_same(&tables[0], &tables[2]);
}

#[test]
fn save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    for table in backends(dir.path(), 50) {
        table.set_attribute("sample", "A1 \"quoted\"").unwrap();
        table.set_attribute("temperature", 4.2).unwrap();

        let csv = dir.path().join("saved.csv");
        table.save_csv(&csv).unwrap();
        assert_same(&table, &Table::load_file(&csv).unwrap());
        assert_same(&table, &Table::open_text(&csv).unwrap());

        let bin = dir.path().join("saved.jdf");
        table.save_binary(&bin).unwrap();
        assert_same(&table, &Table::load_file(&bin).unwrap());
        assert_same(&table, &Table::open_binary(&bin).unwrap());

        let zipped = dir.path().join("saved.jdf.z");
        table.compress_to(&zipped).unwrap();
        assert_same(&table, &Table::load_file(&zipped).unwrap());
    }
}

#[test]
fn streams_reopen_where_they_left_off() {
    let dir = tempfile::tempdir().unwrap();
    let tables = backends(dir.path(), 20);
    tables[1].set_attribute("run", 1).unwrap();
    tables[2].set_attribute("run", 1).unwrap();
    drop(tables);

    let mut rng = rand::thread_rng();
    for table in [
        Table::open_text(dir.path().join("rows.csv")).unwrap(),
        Table::open_binary(dir.path().join("rows.jdf")).unwrap(),
    ] {
        assert_eq!(table.row_count(), 20);
        assert_eq!(table.attribute("run").as_deref(), Some("1"));
        let values = random_values(&mut rng, 20);
        table.add_values(values.clone()).unwrap();
        assert_eq!(table.get_row(20).unwrap().values(), values.as_slice());
        assert_eq!(table.get_row(19).unwrap().value(1), Some(&Value::Int32(19)));
    }
}

#[test]
fn wrong_kinds_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    for table in backends(dir.path(), 3) {
        let before = std::fs::read(dir.path().join("rows.jdf")).unwrap();
        let mut values = HashMap::new();
        values.insert(Column::float("time").with_units("s"), Value::Int32(0));
        values.insert(Column::int("Step"), Value::Int32(0));
        values.insert(Column::long("Ticks").with_units("ns"), Value::Int64(0));
        values.insert(Column::boolean("Stable"), Value::from("yes"));
        values.insert(Column::text("Note"), Value::from(""));
        match table.add_row(values) {
            Err(Error::TypeMismatch { columns }) => assert_eq!(columns, vec![0, 3]),
            other => panic!("expected a type mismatch, not {other:?}"),
        }
        assert_eq!(table.row_count(), 3);
        assert_eq!(std::fs::read(dir.path().join("rows.jdf")).unwrap(), before);
    }
}

#[test]
fn attributes_leave_rows_alone() {
    let dir = tempfile::tempdir().unwrap();
    for table in backends(dir.path(), 100) {
        let before = table.rows().unwrap();
        let mut cursor = table.iter();
        let first = cursor.next().unwrap().unwrap();

        table.set_attribute("a", "short").unwrap();
        table.set_attribute("a", "a much longer value than before").unwrap();
        table.set_attribute("b", "x").unwrap();
        assert_eq!(table.remove_attribute("a").unwrap().as_deref(), Some("a much longer value than before"));
        assert_eq!(table.remove_attribute("a").unwrap(), None);

        assert_eq!(table.rows().unwrap(), before);
        assert_eq!(first, before[0]);
        let rest: Vec<_> = cursor.map(|r| r.unwrap()).collect();
        assert_eq!(rest.as_slice(), &before[1..]);
        assert_eq!(table.attributes().len(), 1);
    }
}

#[test]
fn text_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layout.csv");
    let table = Table::text_stream(
        &path,
        vec![Column::float("x"), Column::text("Comment"), Column::boolean("ok")],
    )
    .unwrap();
    table
        .add_values(vec![1.0.into(), "say \"hi\", then go".into(), true.into()])
        .unwrap();
    table.set_attribute("who", "me").unwrap();
    table.add_values(vec![2.5.into(), "".into(), false.into()]).unwrap();
    expect_test::expect![[r#"
        % ATTRIBUTES: {"who":"me"}
        x, "Comment" {String}, "ok" {Boolean}
        1.0, "say ""hi"", then go", true
        2.5, "", false
    "#]]
    .assert_eq(&std::fs::read_to_string(&path).unwrap());

    table.remove_attribute("who").unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("x, "), "{text}");
}

#[test]
fn temporary_streams_clean_up() {
    let table = Table::binary_stream_temp(columns()).unwrap();
    let path = table.path().unwrap().to_path_buf();
    let mut rng = rand::thread_rng();
    table.add_values(random_values(&mut rng, 0)).unwrap();
    table.clear().unwrap();
    assert_eq!(table.row_count(), 0);
    table.add_values(random_values(&mut rng, 1)).unwrap();
    assert_eq!(table.get_row(0).unwrap().value(1), Some(&Value::Int32(1)));
    assert!(path.exists());
    drop(table);
    assert!(!path.exists());

    let table = Table::text_stream_temp(columns()).unwrap();
    assert_eq!(table.backend(), Backend::Text);
}

#[test]
fn voltage_example() {
    let time = Column::float("Time").with_units("s");
    let voltage = Column::float("Voltage").with_units("V");
    let dir = tempfile::tempdir().unwrap();
    let tables = vec![
        Table::new(vec![time.clone(), voltage.clone()]).unwrap(),
        Table::text_stream(dir.path().join("v.csv"), vec![time.clone(), voltage.clone()]).unwrap(),
        Table::binary_stream(dir.path().join("v.jdf"), vec![time.clone(), voltage.clone()]).unwrap(),
    ];
    for table in tables.iter() {
        table.add_values(vec![0.0.into(), 1.5.into()]).unwrap();
        let mut values = HashMap::new();
        values.insert(time.clone(), Value::Float64(1.0));
        values.insert(voltage.clone(), Value::Float64(1.6));
        table.add_row(values).unwrap();

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get_row(1).unwrap().get(&voltage), Some(&Value::Float64(1.6)));
        let mut csv = Vec::new();
        table.write_csv(&mut csv).unwrap();
        expect_test::expect![[r#"
            Time [s], Voltage [V]
            0.0, 1.5
            1.0, 1.6
        "#]]
        .assert_eq(&String::from_utf8(csv).unwrap());
    }
}

#[test]
fn derived_columns() {
    let v = Column::float("Voltage").with_units("V");
    let i = Column::float("Current").with_units("A");
    let r = Column::float("Resistance").with_units("Ohm").derived(&[&v, &i], |row| {
        let v = row.number("Voltage").unwrap_or(f64::NAN);
        let i = row.number("Current").unwrap_or(f64::NAN);
        Value::Float64(v / i)
    });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("r.jdf");
    let table = Table::binary_stream(&path, vec![v.clone(), i.clone(), r.clone()]).unwrap();
    table.start_row().set(&v, 3.0).set(&i, 2.0).finish().unwrap();
    table
        .add_values(vec![4.0.into(), 2.0.into(), 100.0.into()])
        .unwrap();
    assert_eq!(table.to_list(|row| row.get_as::<f64>(&r).unwrap()).unwrap(), vec![1.5, 2.0]);

    let loaded = Table::load_file(&path).unwrap();
    assert!(!loaded.column(2).unwrap().is_derived());
    assert_eq!(loaded.get_row(1).unwrap().get(&r), Some(&Value::Float64(2.0)));
}

fn steps(table: &Table) -> Vec<i32> {
    let mut steps: Vec<i32> = table
        .iter()
        .map(|row| match row.unwrap().value(1) {
            Some(Value::Int32(step)) => *step,
            other => panic!("bad step {other:?}"),
        })
        .collect();
    steps.sort_unstable();
    steps
}

#[test]
fn appends_from_many_threads() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;
    let total = THREADS * PER_THREAD;
    let dir = tempfile::tempdir().unwrap();
    let tables = vec![
        Table::text_stream(dir.path().join("shared.csv"), columns()).unwrap(),
        Table::binary_stream(dir.path().join("shared.jdf"), columns()).unwrap(),
    ];
    for table in tables.iter() {
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..20 {
                    let seen = table.iter().map(|r| r.unwrap()).count();
                    assert!(seen <= total);
                }
            });
            for t in 0..THREADS {
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    for k in 0..PER_THREAD {
                        table.add_values(random_values(&mut rng, t * PER_THREAD + k)).unwrap();
                    }
                });
            }
        });
        assert_eq!(table.row_count(), total);
        assert_eq!(steps(table), (0..total as i32).collect::<Vec<_>>());
    }
    drop(tables);

    for table in [
        Table::open_text(dir.path().join("shared.csv")).unwrap(),
        Table::open_binary(dir.path().join("shared.jdf")).unwrap(),
    ] {
        assert_eq!(table.row_count(), total);
        assert_eq!(steps(&table), (0..total as i32).collect::<Vec<_>>());
    }
}

#[test]
fn multi_line_text_round_trips() {
    let x = Column::float("x");
    let note = Column::text("Note");
    let notes = ["line one\nline two", "a\r\nb", "\"quoted\"\n", "ends in \\", ""];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.csv");
    let stream = Table::text_stream(&path, vec![x.clone(), note.clone()]).unwrap();
    for (i, n) in notes.iter().enumerate() {
        stream.add_values(vec![(i as f64).into(), (*n).into()]).unwrap();
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), notes.len() + 1);

    let mut csv = Vec::new();
    stream.write_csv(&mut csv).unwrap();
    let read = Table::read_csv(csv.as_slice()).unwrap();
    drop(stream);
    let reopened = Table::open_text(&path).unwrap();
    for table in [&read, &reopened] {
        assert_eq!(table.row_count(), notes.len());
        assert_eq!(
            table.to_list(|r| r.get_as::<String>(&note).unwrap()).unwrap(),
            notes.iter().map(|n| n.to_string()).collect::<Vec<_>>()
        );
    }

    let mut group = resultstore::Group::new();
    group.add_table("a/notes", read).unwrap();
    let mut archive = Vec::new();
    group.write_csv_archive(&mut archive).unwrap();
    let back = resultstore::Group::read_archive(archive.as_slice()).unwrap();
    assert_eq!(back.table("a/notes").unwrap().rows().unwrap(), reopened.rows().unwrap());
}
