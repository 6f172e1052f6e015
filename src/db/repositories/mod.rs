mod cameras;
mod observations;
mod presence;
mod workstations;
