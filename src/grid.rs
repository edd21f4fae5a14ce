//! Voice-control grid geometry.
//!
//! Voice control can overlay a numbered grid and tap a cell by number. A
//! target box is mapped to the closest top-level cell, then refined twice by
//! splitting the chosen cell 3×3.

use serde::Serialize;

use crate::history::Bounds;

const PORTRAIT: (u32, u32) = (10, 15);
const LANDSCAPE: (u32, u32) = (15, 10);
const SUBDIVISION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub landscape: bool,
}

impl GridLayout {
    pub fn for_screen(width: u32, height: u32) -> Self {
        let landscape = width > height;
        let (columns, rows) = if landscape { LANDSCAPE } else { PORTRAIT };
        Self {
            columns,
            rows,
            landscape,
        }
    }

    /// Spoken command that shows this grid.
    pub fn show_command(&self) -> String {
        let verb = if self.landscape { "Show" } else { "show" };
        format!("{verb} grid with {} columns and {} rows", self.columns, self.rows)
    }
}

/// A numbered cell; numbers run row-major from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub number: u32,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Cell {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.x1, self.y1, self.x2 - self.x1, self.y2 - self.y1)
    }

    /// Sum of edge and size differences against `target`.
    fn distance(&self, target: &Bounds) -> i64 {
        let b = self.bounds();
        let d = |a: u32, b: u32| (i64::from(a) - i64::from(b)).abs();
        d(b.x, target.x)
            + d(b.y, target.y)
            + d(b.width, target.width)
            + d(b.height, target.height)
            + d(b.x + b.width, target.x + target.width)
            + d(b.y + b.height, target.y + target.height)
    }
}

fn split(x: f64, y: f64, width: f64, height: f64, columns: u32, rows: u32) -> Vec<Cell> {
    let cell_w = width / f64::from(columns);
    let cell_h = height / f64::from(rows);
    let mut cells = Vec::with_capacity((columns * rows) as usize);
    for row in 0..rows {
        for col in 0..columns {
            let x1 = (x + f64::from(col) * cell_w).round();
            let y1 = (y + f64::from(row) * cell_h).round();
            cells.push(Cell {
                number: row * columns + col + 1,
                x1: x1 as u32,
                y1: y1 as u32,
                x2: (x1 + cell_w).round() as u32,
                y2: (y1 + cell_h).round() as u32,
            });
        }
    }
    cells
}

/// Top-level cells covering a `width`×`height` screenshot.
pub fn cells(width: u32, height: u32, layout: &GridLayout) -> Vec<Cell> {
    split(
        0.0,
        0.0,
        f64::from(width),
        f64::from(height),
        layout.columns,
        layout.rows,
    )
}

/// Split a cell into `SUBDIVISION`×`SUBDIVISION` children numbered from 1.
pub fn subdivide(cell: &Cell) -> Vec<Cell> {
    split(
        f64::from(cell.x1),
        f64::from(cell.y1),
        f64::from(cell.x2 - cell.x1),
        f64::from(cell.y2 - cell.y1),
        SUBDIVISION,
        SUBDIVISION,
    )
}

/// Cell closest to `target`; ties go to the lower number.
pub fn best_match<'a>(cells: &'a [Cell], target: &Bounds) -> Option<&'a Cell> {
    cells.iter().min_by_key(|c| c.distance(target))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSelection {
    pub layout: GridLayout,
    pub cell: u32,
    pub sub_cell: u32,
    pub finer_cell: u32,
}

impl GridSelection {
    /// Spoken steps: show the grid, pick the cell, pick the sub-cell, tap.
    pub fn commands(&self) -> Vec<String> {
        vec![
            self.layout.show_command(),
            self.cell.to_string(),
            self.sub_cell.to_string(),
            format!("Tap, {}", self.finer_cell),
        ]
    }
}

/// Map `target` on a `width`×`height` screenshot to a three-level selection.
pub fn select(width: u32, height: u32, target: &Bounds) -> Option<GridSelection> {
    let layout = GridLayout::for_screen(width, height);
    let top = cells(width, height, &layout);
    let cell = best_match(&top, target)?;
    let subs = subdivide(cell);
    let sub = best_match(&subs, target)?;
    let finer = subdivide(sub);
    let finest = best_match(&finer, target)?;
    Some(GridSelection {
        layout,
        cell: cell.number,
        sub_cell: sub.number,
        finer_cell: finest.number,
    })
}
